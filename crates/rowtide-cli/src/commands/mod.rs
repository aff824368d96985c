mod check;
mod enrich;
mod input;

pub use check::cmd_check;
pub use enrich::{cmd_enrich_static, cmd_enrich_stream};
pub use input::cmd_input;
