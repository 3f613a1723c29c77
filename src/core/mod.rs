//! Storage collaborators for key material
pub mod db;
