use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uploader_core::{Clock, ObjectRef, TagSet};
use uploader_infra::handlers::ObjectCreated;
use uploader_infra::object_store::ObjectStore;

use crate::app::errors::{
    handler_error_to_response, join_error_to_response, json_error, object_store_error_to_response,
};
use crate::app::services::AppServices;

pub const TAGGING_HEADER: &str = "x-object-tagging";

#[derive(Debug, Deserialize)]
pub struct ObjectPath {
    bucket: String,
    key: String,
}

impl ObjectPath {
    fn object(&self) -> Result<ObjectRef, Response> {
        ObjectRef::new(&self.bucket, &self.key)
            .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_object", e.to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct ObjectView {
    pub bucket: String,
    pub key: String,
    pub size: usize,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub tags: BTreeMap<String, String>,
}

/// Store the body, apply tags from `x-object-tagging`, then emit the
/// object-created notification the storage service would have sent.
pub async fn upload(
    Extension(services): Extension<Arc<AppServices>>,
    Path(path): Path<ObjectPath>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let object = match path.object() {
        Ok(o) => o,
        Err(resp) => return resp,
    };

    let tags = match headers.get(TAGGING_HEADER).map(|v| v.to_str()) {
        None => None,
        Some(Ok(raw)) => match TagSet::parse_query(raw) {
            Ok(tags) => Some(tags),
            Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_tagging", e.to_string()),
        },
        Some(Err(_)) => {
            return json_error(StatusCode::BAD_REQUEST, "invalid_tagging", "tagging header is not ASCII");
        }
    };

    let store = services.pipeline().store();
    if let Err(err) = store.put(&object, body.to_vec(), TagSet::new()) {
        return object_store_error_to_response(err);
    }
    if let Some(tags) = tags {
        if let Err(err) = store.put_tags(&object, tags) {
            return object_store_error_to_response(err);
        }
    }

    let received = services.pipeline().clock().now();
    let notification = ObjectCreated::new(&object, Some(received.to_rfc3339()));
    match tokio::task::spawn_blocking(move || services.pipeline().ingest(&notification)).await {
        Ok(Ok(envelope)) => (StatusCode::ACCEPTED, Json(envelope)).into_response(),
        Ok(Err(err)) => handler_error_to_response(err),
        Err(err) => join_error_to_response(err),
    }
}

pub async fn describe(
    Extension(services): Extension<Arc<AppServices>>,
    Path(path): Path<ObjectPath>,
) -> Response {
    let object = match path.object() {
        Ok(o) => o,
        Err(resp) => return resp,
    };

    let store = services.pipeline().store();
    let view = store.get(&object).and_then(|body| {
        let metadata = store.get_metadata(&object)?;
        let tags = store.get_tags(&object)?;
        Ok(ObjectView {
            bucket: object.bucket().to_string(),
            key: object.key().to_string(),
            size: body.len(),
            last_modified: metadata.last_modified,
            etag: metadata.etag,
            tags: tags.iter().map(|t| (t.key.clone(), t.value.clone())).collect(),
        })
    });

    match view {
        Ok(view) => Json(view).into_response(),
        Err(err) => object_store_error_to_response(err),
    }
}
