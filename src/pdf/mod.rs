pub mod image_xobject;
pub mod merger;
pub mod optimizer;
pub mod reader;
pub mod writer;
