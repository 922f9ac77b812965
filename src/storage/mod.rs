pub mod disk;
pub mod layout;
pub mod retention;
