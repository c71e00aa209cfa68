//! ImageDocument port - 画像参照の抽出と置換
//!
//! DOM でも Markdown でもよい。コアが依存するのはこの 2 メソッドだけ。

use std::collections::HashMap;

pub trait ImageDocument {
    /// Every image address in document order, duplicates included.
    fn extract_image_refs(&self) -> Vec<String>;

    /// Replace every occurrence of each key with its value. Addresses
    /// missing from `replacements` are left untouched.
    fn replace_image_refs(&mut self, replacements: &HashMap<String, String>);
}
