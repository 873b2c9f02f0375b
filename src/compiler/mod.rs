pub mod chunk;
pub mod emitter;
