pub mod decoration;
pub mod location;
pub mod search;
pub mod submit;
