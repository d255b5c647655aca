pub mod mdoc;
pub mod mrc;
pub mod rawtlt;
