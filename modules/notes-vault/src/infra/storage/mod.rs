pub mod cutover;
pub mod entity;
pub mod migrations;
pub mod repo;
pub mod schema;
pub mod soft_delete;
