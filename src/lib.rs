pub mod core;
pub mod logging;

#[cfg(test)]
mod testing;
