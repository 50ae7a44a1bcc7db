//! Typed rows.
//!
//! [`TabularRecord`] is the single capability writers and enrichers need from
//! a typed row: its field names and its rendering as cells. Field values are
//! rendered through [`ToCell`] with a set of [`SerializerOptions`].

use itertools::Itertools;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializerOptions {
    pub plural_separator: String,
    pub none_value: String,
    pub true_value: String,
    pub false_value: String,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        SerializerOptions {
            plural_separator: "|".to_string(),
            none_value: String::new(),
            true_value: "true".to_string(),
            false_value: "false".to_string(),
        }
    }
}

impl SerializerOptions {
    pub fn plural_separator(mut self, separator: &str) -> Self {
        self.plural_separator = separator.to_string();
        self
    }

    pub fn none_value(mut self, value: &str) -> Self {
        self.none_value = value.to_string();
        self
    }

    pub fn booleans(mut self, true_value: &str, false_value: &str) -> Self {
        self.true_value = true_value.to_string();
        self.false_value = false_value.to_string();
        self
    }
}

/// Renders a typed value as a single CSV cell.
pub trait ToCell {
    fn to_cell(&self, options: &SerializerOptions) -> String;
}

impl ToCell for str {
    fn to_cell(&self, _options: &SerializerOptions) -> String {
        self.to_string()
    }
}

impl ToCell for String {
    fn to_cell(&self, _options: &SerializerOptions) -> String {
        self.clone()
    }
}

impl ToCell for bool {
    fn to_cell(&self, options: &SerializerOptions) -> String {
        if *self {
            options.true_value.clone()
        } else {
            options.false_value.clone()
        }
    }
}

macro_rules! display_cells {
    ($($ty:ty),*) => {
        $(
            impl ToCell for $ty {
                fn to_cell(&self, _options: &SerializerOptions) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

display_cells!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, char);

impl<T: ToCell + ?Sized> ToCell for &T {
    fn to_cell(&self, options: &SerializerOptions) -> String {
        (**self).to_cell(options)
    }
}

impl<T: ToCell> ToCell for Option<T> {
    fn to_cell(&self, options: &SerializerOptions) -> String {
        match self {
            Some(value) => value.to_cell(options),
            None => options.none_value.clone(),
        }
    }
}

impl<T: ToCell> ToCell for [T] {
    fn to_cell(&self, options: &SerializerOptions) -> String {
        self.iter()
            .map(|item| item.to_cell(options))
            .join(&options.plural_separator)
    }
}

impl<T: ToCell> ToCell for Vec<T> {
    fn to_cell(&self, options: &SerializerOptions) -> String {
        self.as_slice().to_cell(options)
    }
}

impl ToCell for serde_json::Value {
    fn to_cell(&self, options: &SerializerOptions) -> String {
        match self {
            serde_json::Value::Null => options.none_value.clone(),
            serde_json::Value::String(text) => text.clone(),
            serde_json::Value::Bool(flag) => flag.to_cell(options),
            other => other.to_string(),
        }
    }
}

/// Wraps any serializable value so it is rendered as compact JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize> ToCell for Json<T> {
    fn to_cell(&self, options: &SerializerOptions) -> String {
        match serde_json::to_string(&self.0) {
            Ok(text) if text == "null" => options.none_value.clone(),
            Ok(text) => text,
            Err(_) => options.none_value.clone(),
        }
    }
}

/// A row-shaped type: knows its field names and renders itself as cells.
pub trait TabularRecord {
    fn fieldnames() -> Vec<String>
    where
        Self: Sized;

    /// Options used by [`TabularRecord::as_csv_row`] implementations.
    fn serializer_options() -> SerializerOptions
    where
        Self: Sized,
    {
        SerializerOptions::default()
    }

    fn as_csv_row(&self) -> Vec<String>;
}

/// Renders a list of fields with one set of options; a small helper for
/// hand-written [`TabularRecord::as_csv_row`] implementations.
pub fn render_fields(fields: &[&dyn ToCell], options: &SerializerOptions) -> Vec<String> {
    fields.iter().map(|field| field.to_cell(options)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Video {
        title: String,
        tags: Vec<String>,
        views: Option<u64>,
        published: bool,
    }

    impl TabularRecord for Video {
        fn fieldnames() -> Vec<String> {
            ["title", "tags", "views", "published"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        }

        fn serializer_options() -> SerializerOptions {
            SerializerOptions::default()
                .plural_separator("&")
                .booleans("yes", "no")
        }

        fn as_csv_row(&self) -> Vec<String> {
            render_fields(
                &[&self.title, &self.tags, &self.views, &self.published],
                &Self::serializer_options(),
            )
        }
    }

    #[test]
    fn record_renders_with_its_options() {
        let video = Video {
            title: "Title".to_string(),
            tags: vec!["a".to_string(), "b".to_string()],
            views: None,
            published: true,
        };
        assert_eq!(video.as_csv_row(), vec!["Title", "a&b", "", "yes"]);
        assert_eq!(Video::fieldnames().len(), 4);
    }

    #[test]
    fn default_options_render_common_values() {
        let options = SerializerOptions::default();
        assert_eq!(vec![1u32, 2, 3].to_cell(&options), "1|2|3");
        assert_eq!(false.to_cell(&options), "false");
        assert_eq!(None::<i32>.to_cell(&options), "");
        assert_eq!(Some(4.5f64).to_cell(&options), "4.5");
        assert_eq!(
            Json(serde_json::json!({"a": [1, 2]})).to_cell(&options),
            r#"{"a":[1,2]}"#
        );
        assert_eq!(serde_json::json!("plain").to_cell(&options), "plain");
    }
}
