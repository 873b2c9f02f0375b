pub mod heap;
pub mod value;
