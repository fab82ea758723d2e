pub mod usage_retention;
