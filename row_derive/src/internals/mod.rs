pub mod ast;
mod ctx;

pub use self::ctx::Ctxt;
