//! Blob extraction and reinsertion.
//!
//! [`extract`] walks a [`Payload`] depth-first and records every binary leaf as
//! a [`BlobRef`]. Handles reached more than once share one upload slot, owned
//! by the first occurrence in traversal order. After the canonical handles
//! have been uploaded, [`reinsert`] writes the returned file names back at
//! every recorded path.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::trace;

use queuewire_core::endpoint::{BARE_NAME_COMPONENTS, WITHHELD_COMPONENTS};
use queuewire_core::{display_path, BlobHandle, BlobIdentity, EndpointDescriptor, PathKey, Payload};

use crate::error::{BlobError, BlobResult};

/// What to do with a binary leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum BlobPayload {
    /// Send through the upload endpoint
    Upload(BlobHandle),
    /// Record the hole but never upload; inlined by [`inline_withheld`]
    Withheld(BlobHandle),
}

impl BlobPayload {
    pub fn handle(&self) -> &BlobHandle {
        match self {
            BlobPayload::Upload(handle) | BlobPayload::Withheld(handle) => handle,
        }
    }

    pub fn is_withheld(&self) -> bool {
        matches!(self, BlobPayload::Withheld(_))
    }
}

/// Shape of the reference written back after upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// The bare server file name
    Blob,
    /// `{"is_file": true, "name": <name>, "data": null}`
    Object,
}

/// One binary occurrence inside a request value.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRef {
    pub path: Vec<PathKey>,
    pub payload: BlobPayload,
    pub kind: RefKind,
    /// Index into the upload set; `None` for withheld occurrences
    pub slot: Option<usize>,
    /// First occurrence of this handle, owner of the upload slot
    pub canonical: bool,
}

struct Extractor<'a> {
    endpoint: Option<&'a EndpointDescriptor>,
    slots: HashMap<BlobIdentity, usize>,
    refs: Vec<BlobRef>,
}

impl<'a> Extractor<'a> {
    fn walk(&mut self, value: &Payload, hint: Option<&str>, path: &mut Vec<PathKey>) {
        match value {
            Payload::Blob(handle) => self.record(handle, hint, path),
            Payload::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    path.push(PathKey::Index(i));
                    self.walk(item, hint, path);
                    path.pop();
                }
            }
            // a hint covers the value and its list items, not object fields
            Payload::Object(map) => {
                for (key, item) in map {
                    path.push(PathKey::Key(key.clone()));
                    self.walk(item, None, path);
                    path.pop();
                }
            }
            _ => {}
        }
    }

    fn record(&mut self, handle: &BlobHandle, hint: Option<&str>, path: &[PathKey]) {
        let kind = match hint {
            Some(h) if BARE_NAME_COMPONENTS.contains(&h) => RefKind::Blob,
            _ => RefKind::Object,
        };

        let withheld = hint.is_some_and(|h| WITHHELD_COMPONENTS.contains(&h));
        let (payload, slot, canonical) = if withheld {
            (BlobPayload::Withheld(handle.clone()), None, true)
        } else {
            let next = self.slots.len();
            let slot = *self.slots.entry(handle.identity()).or_insert(next);
            (BlobPayload::Upload(handle.clone()), Some(slot), slot == next)
        };

        trace!(
            path = %display_path(path),
            blob = %handle.identity(),
            ?slot,
            canonical,
            withheld,
            "recorded blob"
        );

        self.refs.push(BlobRef {
            path: path.to_vec(),
            payload,
            kind,
            slot,
            canonical,
        });
    }
}

/// Record every binary leaf of `value`.
///
/// Paths are `path_prefix` followed by the position inside `value`. When
/// `is_root_payload` is set and `value` is the positional argument list, the
/// type hint for element `i` is the component kind of parameter `i` of
/// `endpoint`; otherwise `type_hint` applies to the whole value.
pub fn extract(
    value: &Payload,
    type_hint: Option<&str>,
    path_prefix: &[PathKey],
    is_root_payload: bool,
    endpoint: Option<&EndpointDescriptor>,
) -> Vec<BlobRef> {
    let mut extractor = Extractor {
        endpoint,
        slots: HashMap::new(),
        refs: Vec::new(),
    };
    let mut path = path_prefix.to_vec();

    match (value, is_root_payload) {
        (Payload::Array(items), true) => {
            for (i, item) in items.iter().enumerate() {
                let hint = extractor
                    .endpoint
                    .and_then(|e| e.component_at(i))
                    .filter(|c| !c.is_empty())
                    .or(type_hint);
                path.push(PathKey::Index(i));
                extractor.walk(item, hint, &mut path);
                path.pop();
            }
        }
        _ => extractor.walk(value, type_hint, &mut path),
    }

    extractor.refs
}

/// Canonical handles to upload, in slot order.
pub fn upload_set(refs: &[BlobRef]) -> Vec<BlobHandle> {
    let mut slotted: Vec<(usize, &BlobHandle)> = refs
        .iter()
        .filter(|r| r.canonical)
        .filter_map(|r| match (&r.payload, r.slot) {
            (BlobPayload::Upload(handle), Some(slot)) => Some((slot, handle)),
            _ => None,
        })
        .collect();
    slotted.sort_by_key(|(slot, _)| *slot);
    slotted.into_iter().map(|(_, h)| h.clone()).collect()
}

/// The JSON-safe reference written in place of an uploaded blob.
pub fn file_reference(kind: RefKind, name: &str) -> Payload {
    match kind {
        RefKind::Blob => Payload::from(name),
        RefKind::Object => Payload::object([
            ("is_file", Payload::Bool(true)),
            ("name", Payload::from(name)),
            ("data", Payload::Null),
        ]),
    }
}

/// Base64 data URI for a handle, e.g. `data:image/png;base64,iVBORw0...`.
pub fn data_uri(handle: &BlobHandle) -> String {
    format!(
        "data:{};base64,{}",
        handle.content_type(),
        STANDARD.encode(handle.bytes())
    )
}

fn write_at(value: &mut Payload, path: &[PathKey], replacement: Payload) -> BlobResult<()> {
    value
        .set_path(path, replacement)
        .map_err(|_| BlobError::InvalidPath {
            path: display_path(path),
        })
}

/// Replace every uploaded occurrence with its file reference.
///
/// `uploaded_names[slot]` is the server name for the handle in `slot`.
pub fn reinsert(
    mut value: Payload,
    refs: &[BlobRef],
    uploaded_names: &[String],
) -> BlobResult<Payload> {
    for blob_ref in refs {
        let Some(slot) = blob_ref.slot else { continue };
        if blob_ref.payload.is_withheld() {
            continue;
        }
        let name = uploaded_names
            .get(slot)
            .ok_or(BlobError::CountMismatch {
                expected: slot + 1,
                got: uploaded_names.len(),
            })?;
        write_at(&mut value, &blob_ref.path, file_reference(blob_ref.kind, name))?;
    }
    Ok(value)
}

/// Replace every withheld occurrence with an inline data URI.
pub fn inline_withheld(mut value: Payload, refs: &[BlobRef]) -> BlobResult<Payload> {
    for blob_ref in refs {
        if let BlobPayload::Withheld(handle) = &blob_ref.payload {
            write_at(&mut value, &blob_ref.path, Payload::String(data_uri(handle)))?;
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuewire_core::ParameterSpec;
    use serde_json::json;

    fn blob(bytes: &[u8]) -> BlobHandle {
        BlobHandle::new(bytes.to_vec())
    }

    #[test]
    fn root_blob_has_empty_path() {
        let handle = blob(b"x");
        let refs = extract(&Payload::Blob(handle.clone()), None, &[], false, None);
        assert_eq!(refs.len(), 1);
        assert!(refs[0].path.is_empty());
        assert_eq!(refs[0].slot, Some(0));

        let out = reinsert(Payload::Blob(handle), &refs, &["f.bin".to_string()]).unwrap();
        assert_eq!(out.to_json().unwrap(), json!({"is_file": true, "name": "f.bin", "data": null}));
    }

    #[test]
    fn aliased_handle_uploads_once() {
        let shared = blob(b"shared");
        let other = blob(b"shared");
        let value = Payload::from(vec![
            Payload::Blob(shared.clone()),
            Payload::object([("a", Payload::Blob(other)), ("b", Payload::Blob(shared))]),
        ]);

        let refs = extract(&value, None, &[], false, None);
        assert_eq!(refs.len(), 3);
        assert_eq!(
            refs.iter().map(|r| r.slot).collect::<Vec<_>>(),
            vec![Some(0), Some(1), Some(0)]
        );
        assert_eq!(
            refs.iter().map(|r| r.canonical).collect::<Vec<_>>(),
            vec![true, true, false]
        );
        assert_eq!(upload_set(&refs).len(), 2);

        let names = vec!["one".to_string(), "two".to_string()];
        let out = reinsert(value, &refs, &names).unwrap().to_json().unwrap();
        assert_eq!(out[0]["name"], "one");
        assert_eq!(out[1]["a"]["name"], "two");
        assert_eq!(out[1]["b"]["name"], "one");
    }

    #[test]
    fn endpoint_components_drive_hints() {
        let endpoint = EndpointDescriptor::new(vec![
            ParameterSpec::required("img").with_component("Image"),
            ParameterSpec::required("gallery").with_component("Gallery"),
            ParameterSpec::required("file").with_component("File"),
        ]);
        let png = blob(b"\x89PNG").with_mime_type("image/png");
        let args = Payload::from(vec![
            Payload::Blob(png),
            Payload::from(vec![Payload::Blob(blob(b"g"))]),
            Payload::Blob(blob(b"f")),
        ]);

        let refs = extract(&args, None, &[], true, Some(&endpoint));
        assert!(refs[0].payload.is_withheld());
        assert_eq!(refs[0].slot, None);
        assert_eq!(refs[1].kind, RefKind::Blob);
        assert_eq!(refs[1].path, vec![PathKey::Index(1), PathKey::Index(0)]);
        assert_eq!(refs[2].kind, RefKind::Object);
        assert_eq!(upload_set(&refs).len(), 2);

        let inlined = inline_withheld(args, &refs).unwrap();
        let out = reinsert(inlined, &refs, &["g.png".into(), "f.txt".into()])
            .unwrap()
            .to_json()
            .unwrap();
        assert_eq!(out[0], json!("data:image/png;base64,iVBORw=="));
        assert_eq!(out[1], json!(["g.png"]));
        assert_eq!(out[2]["name"], "f.txt");
    }

    #[test]
    fn object_fields_lose_the_component_hint() {
        let endpoint = EndpointDescriptor::new(vec![
            ParameterSpec::required("img").with_component("Image"),
            ParameterSpec::required("gallery").with_component("Gallery"),
        ]);
        let args = Payload::from(vec![
            Payload::object([("mask", Payload::Blob(blob(b"m")))]),
            Payload::from(vec![Payload::object([("image", Payload::Blob(blob(b"g")))])]),
        ]);

        let refs = extract(&args, None, &[], true, Some(&endpoint));

        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| !r.payload.is_withheld()));
        assert!(refs.iter().all(|r| r.kind == RefKind::Object));
        assert_eq!(
            refs[1].path,
            vec![PathKey::Index(1), PathKey::Index(0), PathKey::from("image")]
        );
        assert_eq!(upload_set(&refs).len(), 2);
    }

    #[test]
    fn prefix_is_prepended() {
        let refs = extract(
            &Payload::Blob(blob(b"x")),
            None,
            &[PathKey::from("data"), PathKey::from(2usize)],
            false,
            None,
        );
        assert_eq!(display_path(&refs[0].path), "$.data[2]");
    }

    #[test]
    fn stale_path_fails_loudly() {
        let value = Payload::from(vec![Payload::Blob(blob(b"x"))]);
        let refs = extract(&value, None, &[], false, None);
        let err = reinsert(Payload::from(json!({})), &refs, &["n".into()]).unwrap_err();
        assert!(matches!(err, BlobError::InvalidPath { ref path } if path == "$[0]"));

        let err = reinsert(value, &refs, &[]).unwrap_err();
        assert!(matches!(err, BlobError::CountMismatch { .. }));
    }
}
