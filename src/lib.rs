// Define data modules
pub mod models;     // Domain records and the response envelope
pub mod error;      // Error taxonomy and JSON error bodies
pub mod config;     // Environment configuration
pub mod store;      // Record store seam (hosted client, in-memory backend)
pub mod identity;   // Token verification seam
pub mod validation; // Request schemas and extractors
pub mod logic;      // Task lifecycle and derived-time rules
pub mod analytics;  // Statistics and distribution folds
pub mod auth;       // Bearer-token gate
pub mod app;        // Router assembly and middleware
pub mod keep_alive; // Optional self-ping

// HTTP handlers, one module per resource
pub mod routes_analytics;
pub mod routes_categories;
pub mod routes_profile;
pub mod routes_subtasks;
pub mod routes_tasks;
