//! HTML processing for content pages

mod sanitizer;

pub use sanitizer::{
    Leniency, SanitizeConfig, SanitizeError, Sanitizer, DEFAULT_DISALLOWED_TAGS, XML_DECLARATION,
};
