mod ident;

pub use ident::*;
