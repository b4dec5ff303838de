pub mod aggregate;
pub mod run;
pub mod status;
pub mod templates;
