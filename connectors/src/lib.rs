pub mod app;
pub mod fetch;
pub mod gate;
pub mod model;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use app::App;
pub use model::{Attachment, Document};
