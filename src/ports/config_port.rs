//! Configuration access port trait.

pub trait ConfigPort {
    /// Raw value of `key`; typed parsing and its errors belong to the caller.
    fn get_string(&self, section: &str, key: &str) -> Option<String>;

    /// Keys present in `section`, sorted. Empty when the section is absent.
    fn keys(&self, section: &str) -> Vec<String>;
}
