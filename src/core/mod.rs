pub mod dedup;
pub mod dispatch;
pub mod encode;
pub mod model;
pub mod option;
pub mod pipeline;
pub mod renderer;
pub mod sink;
pub mod source;
pub mod template;
pub mod theme;
