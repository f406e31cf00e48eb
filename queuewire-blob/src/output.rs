//! Output file references.
//!
//! Files produced by a call come back as `{"is_file": true, "name": <server path>}`.
//! [`resolve_output_files`] fills their `data` with a URL the caller can fetch,
//! `{root}/file=<name>`, or `/proxy={root_url}file=<name>` for apps served
//! behind a proxy. The declared return component decides which outputs are
//! files: `File` outputs may be a single file or a list, `Gallery` outputs are
//! lists of images with optional captions, and any other output is rewritten
//! only when it is itself a file object.

use queuewire_core::{Payload, PayloadMap, ReturnSpec};
use tracing::trace;

const FILE_COMPONENT: &str = "File";
const GALLERY_COMPONENT: &str = "Gallery";

/// Where an app serves the files it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRoot<'a> {
    pub root: &'a str,
    pub root_url: Option<&'a str>,
}

impl<'a> FileRoot<'a> {
    pub fn new(root: &'a str, root_url: Option<&'a str>) -> Self {
        Self { root, root_url }
    }

    pub fn url_for(&self, name: &str) -> String {
        match self.root_url {
            Some(root_url) => format!("/proxy={}file={}", root_url, name),
            None => format!("{}/file={}", self.root, name),
        }
    }
}

/// Rewrite the file outputs of one call. `outputs` is the positional output
/// list; anything else is returned untouched.
pub fn resolve_output_files(outputs: Payload, returns: &[ReturnSpec], files: FileRoot<'_>) -> Payload {
    let Payload::Array(items) = outputs else {
        return outputs;
    };

    let resolved = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match returns.get(i).map(|r| r.component_kind.as_str()) {
            Some(FILE_COMPONENT) => normalize_file(item, files),
            Some(GALLERY_COMPONENT) => gallery(item, files),
            _ if is_file_object(&item) => normalize_file(item, files),
            _ => item,
        })
        .collect();
    Payload::Array(resolved)
}

fn is_file_map(map: &PayloadMap) -> bool {
    map.get("is_file").and_then(Payload::as_bool).unwrap_or(false)
}

fn is_file_object(value: &Payload) -> bool {
    value.as_object().is_some_and(is_file_map)
}

fn normalize_file(file: Payload, files: FileRoot<'_>) -> Payload {
    match file {
        Payload::Null => Payload::Null,
        // raw content rather than a server path
        Payload::String(data) => Payload::object([
            ("name", Payload::from("file_data")),
            ("data", Payload::String(data)),
        ]),
        Payload::Array(items) => Payload::Array(
            items
                .into_iter()
                .map(|item| normalize_file(item, files))
                .collect(),
        ),
        Payload::Object(mut map) if is_file_map(&map) => {
            if let Some(url) = map.get("name").and_then(Payload::as_str).map(|name| files.url_for(name)) {
                trace!(url = %url, "output file");
                map.insert("data".to_string(), Payload::String(url));
            }
            Payload::Object(map)
        }
        other => other,
    }
}

/// Each entry becomes `[file, caption]`.
fn gallery(item: Payload, files: FileRoot<'_>) -> Payload {
    let Payload::Array(images) = item else {
        return item;
    };

    let entries = images
        .into_iter()
        .map(|image| match image {
            Payload::Array(pair) => {
                let mut pair = pair.into_iter();
                let file = pair.next().unwrap_or_default();
                let caption = pair.next().unwrap_or_default();
                Payload::Array(vec![normalize_file(file, files), caption])
            }
            file => Payload::Array(vec![normalize_file(file, files), Payload::Null]),
        })
        .collect();
    Payload::Array(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    const ROOT: &str = "http://app.test";

    fn returns(components: &[&str]) -> Vec<ReturnSpec> {
        components
            .iter()
            .map(|c| ReturnSpec {
                component_kind: c.to_string(),
                ..ReturnSpec::default()
            })
            .collect()
    }

    fn resolve(outputs: Value, components: &[&str]) -> Value {
        resolve_output_files(Payload::from(outputs), &returns(components), FileRoot::new(ROOT, None))
            .to_json()
            .unwrap()
    }

    #[test]
    fn file_outputs_get_urls() {
        let out = resolve(
            json!([
                {"is_file": true, "name": "/tmp/gradio/a.txt", "data": null},
                [{"is_file": true, "name": "/tmp/b.wav"}, null],
                "plain text"
            ]),
            &["File", "File", "Textbox"],
        );

        assert_eq!(out[0]["data"], json!("http://app.test/file=/tmp/gradio/a.txt"));
        assert_eq!(out[0]["name"], json!("/tmp/gradio/a.txt"));
        assert_eq!(out[1][0]["data"], json!("http://app.test/file=/tmp/b.wav"));
        assert_eq!(out[1][1], Value::Null);
        assert_eq!(out[2], json!("plain text"));
    }

    #[test]
    fn string_in_a_file_slot_is_inline_data() {
        let out = resolve(json!(["data:text/plain;base64,aGk="]), &["File"]);
        assert_eq!(out[0], json!({"name": "file_data", "data": "data:text/plain;base64,aGk="}));
    }

    #[test]
    fn gallery_entries_become_pairs() {
        let out = resolve(
            json!([[
                [{"is_file": true, "name": "/tmp/1.png"}, "first"],
                {"is_file": true, "name": "/tmp/2.png"}
            ]]),
            &["Gallery"],
        );

        assert_eq!(out[0][0][0]["data"], json!("http://app.test/file=/tmp/1.png"));
        assert_eq!(out[0][0][1], json!("first"));
        assert_eq!(out[0][1][0]["data"], json!("http://app.test/file=/tmp/2.png"));
        assert_eq!(out[0][1][1], Value::Null);
    }

    #[test]
    fn undeclared_file_objects_are_rewritten_at_the_top_level_only() {
        let out = resolve(
            json!([
                {"is_file": true, "name": "/tmp/x.bin"},
                {"result": {"is_file": true, "name": "/tmp/deep.bin"}}
            ]),
            &[],
        );

        assert_eq!(out[0]["data"], json!("http://app.test/file=/tmp/x.bin"));
        assert_eq!(out[1], json!({"result": {"is_file": true, "name": "/tmp/deep.bin"}}));
    }

    #[test]
    fn proxied_apps_use_the_proxy_path() {
        let files = FileRoot::new(ROOT, Some("https://proxy.example/app/"));
        let out = resolve_output_files(
            Payload::from(json!([{"is_file": true, "name": "/tmp/a.txt"}])),
            &returns(&["File"]),
            files,
        )
        .to_json()
        .unwrap();

        assert_eq!(out[0]["data"], json!("/proxy=https://proxy.example/app/file=/tmp/a.txt"));
    }

    #[test]
    fn non_list_outputs_pass_through() {
        let out = resolve(json!({"is_file": true, "name": "/tmp/a.txt"}), &["File"]);
        assert_eq!(out, json!({"is_file": true, "name": "/tmp/a.txt"}));
    }
}
