pub mod archive;
pub mod hash;
pub mod matcher;
pub mod normalize;
pub mod schema;
pub mod validate;
