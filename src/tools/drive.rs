//! Drive tools

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::{Value, json};

use super::decode_base64_payload;
use crate::graph::GraphClient;
use crate::graph::paging::{Pagination, next_cursor, pagination_query};
use crate::{Error, Result};

/// Addressing for a drive item: by drive+item id, drive+path, item id, path,
/// or the default drive root when everything is absent.
#[derive(Debug, Default, Deserialize)]
pub struct ItemRef {
    /// Owning drive
    #[serde(default)]
    pub drive_id: Option<String>,
    /// Item id
    #[serde(default)]
    pub item_id: Option<String>,
    /// Path relative to the drive root
    #[serde(default)]
    pub path: Option<String>,
}

impl ItemRef {
    fn url_path(&self) -> String {
        match (&self.drive_id, &self.item_id, &self.path) {
            (Some(drive), Some(item), _) => format!("/drives/{drive}/items/{item}"),
            (Some(drive), None, Some(path)) => format!("/drives/{drive}/root:/{path}"),
            (None, Some(item), _) => format!("/me/drive/items/{item}"),
            (None, None, Some(path)) => format!("/me/drive/root:/{path}"),
            (None, None, None) | (Some(_), None, None) => "/me/drive/root".to_string(),
        }
    }
}

/// Arguments for `drive_list_children`.
#[derive(Debug, Deserialize)]
pub struct ListChildrenArgs {
    /// Parent item
    #[serde(flatten)]
    pub item: ItemRef,
    /// Pagination window
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Arguments for `drive_get_item`.
#[derive(Debug, Deserialize)]
pub struct GetItemArgs {
    /// Item to fetch
    #[serde(flatten)]
    pub item: ItemRef,
}

/// Arguments for `drive_search`.
#[derive(Debug, Deserialize)]
pub struct SearchArgs {
    /// Search query
    #[serde(default)]
    pub query: Option<String>,
    /// Folder path to search under; drive root when absent
    #[serde(default)]
    pub path: Option<String>,
    /// Pagination window
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Arguments for `drive_download_file`.
#[derive(Debug, Deserialize)]
pub struct DownloadFileArgs {
    /// Item to download
    #[serde(flatten)]
    pub item: ItemRef,
    /// `download_url` (default) or `content_base64`
    #[serde(default)]
    pub return_mode: Option<String>,
    /// Caller bound on inline content size
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

/// Arguments for `drive_upload_small_file`.
#[derive(Debug, Deserialize)]
pub struct UploadSmallFileArgs {
    /// Destination folder path
    #[serde(default)]
    pub parent_path: Option<String>,
    /// Destination file name
    pub filename: String,
    /// File content
    pub content_base64: String,
    /// Replay key for retried calls
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Arguments for `drive_create_upload_session`.
#[derive(Debug, Deserialize)]
pub struct CreateUploadSessionArgs {
    /// Destination folder path
    #[serde(default)]
    pub parent_path: Option<String>,
    /// Destination file name
    pub filename: String,
    /// Name-collision behaviour (`rename`, `replace`, `fail`)
    #[serde(default)]
    pub conflict_behavior: Option<String>,
    /// Replay key for retried calls
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Arguments for `drive_upload_chunk`.
#[derive(Debug, Deserialize)]
pub struct UploadChunkArgs {
    /// Upload session URL from `drive_create_upload_session`
    pub upload_url: String,
    /// Chunk content
    pub content_base64: String,
    /// First byte offset of this chunk
    pub chunk_start: u64,
    /// Last byte offset of this chunk
    pub chunk_end: u64,
    /// Total file size
    pub total_size: u64,
}

/// Arguments for `drive_create_folder`.
#[derive(Debug, Deserialize)]
pub struct CreateFolderArgs {
    /// Parent folder path
    #[serde(default)]
    pub parent_path: Option<String>,
    /// New folder name
    pub folder_name: String,
    /// Name-collision behaviour
    #[serde(default)]
    pub conflict_behavior: Option<String>,
}

/// Arguments for `drive_delete_item`.
#[derive(Debug, Deserialize)]
pub struct DeleteItemArgs {
    /// Item to delete
    #[serde(flatten)]
    pub item: ItemRef,
}

/// Arguments for `drive_share_create_link`.
#[derive(Debug, Deserialize)]
pub struct CreateShareLinkArgs {
    /// Item to share
    #[serde(flatten)]
    pub item: ItemRef,
    /// `view` (default) or `edit`
    #[serde(default)]
    pub link_type: Option<String>,
    /// Link scope; `organization` by default
    #[serde(default)]
    pub scope: Option<String>,
}

/// Fetch the user's default drive.
pub async fn get_default_drive(graph: &GraphClient, token: &str) -> Result<Value> {
    let payload = graph.get("/me/drive").send_json(token).await?;
    Ok(json!({ "drive": map_drive(&payload) }))
}

/// List the children of a folder.
pub async fn list_children(
    graph: &GraphClient,
    token: &str,
    args: ListChildrenArgs,
) -> Result<Value> {
    let payload = graph
        .get(&format!("{}/children", args.item.url_path()))
        .query_pairs(pagination_query(args.pagination.as_ref()))
        .send_json(token)
        .await?;
    Ok(json!({
        "items": items(&payload).map(map_item).collect::<Vec<_>>(),
        "next_cursor": next_cursor(&payload),
    }))
}

/// Fetch a single drive item.
pub async fn get_item(graph: &GraphClient, token: &str, args: GetItemArgs) -> Result<Value> {
    let payload = graph.get(&args.item.url_path()).send_json(token).await?;
    Ok(json!({ "item": map_item(&payload) }))
}

/// Search drive items by name/content.
pub async fn search(graph: &GraphClient, token: &str, args: SearchArgs) -> Result<Value> {
    let query = args
        .query
        .as_deref()
        .filter(|q| !q.is_empty())
        .ok_or_else(|| Error::validation("Query is required"))?;
    let path = args.path.as_deref().unwrap_or("root");

    let payload = graph
        .get(&format!("/me/drive/{path}/search(q='{query}')"))
        .query_pairs(pagination_query(args.pagination.as_ref()))
        .send_json(token)
        .await?;
    Ok(json!({
        "items": items(&payload).map(map_item).collect::<Vec<_>>(),
        "next_cursor": next_cursor(&payload),
    }))
}

/// Hand back a download URL, or the content itself base64-inlined.
pub async fn download_file(
    graph: &GraphClient,
    token: &str,
    max_base64_bytes: usize,
    args: DownloadFileArgs,
) -> Result<Value> {
    let url_path = args.item.url_path();
    let return_mode = args.return_mode.as_deref().unwrap_or("download_url");

    if return_mode == "download_url" {
        let payload = graph.get(&url_path).send_json(token).await?;
        return Ok(json!({
            "download_url": payload.get("@microsoft.graph.downloadUrl"),
            "size_bytes": payload.get("size"),
        }));
    }

    let max_bytes = args.max_bytes.unwrap_or(max_base64_bytes).min(max_base64_bytes);
    let raw = graph
        .get(&format!("{url_path}/content"))
        .send_bytes(token)
        .await?;
    if raw.len() > max_bytes {
        return Err(Error::payload_too_large("File too large for base64"));
    }
    Ok(json!({
        "content_base64": STANDARD.encode(&raw),
        "size_bytes": raw.len(),
    }))
}

/// Single-shot upload of a small file.
pub async fn upload_small_file(
    graph: &GraphClient,
    token: &str,
    max_base64_bytes: usize,
    args: UploadSmallFileArgs,
) -> Result<Value> {
    let content = decode_base64_payload(&args.content_base64, max_base64_bytes)?;
    let parent_path = normalize_parent_path(args.parent_path.as_deref());
    let payload = graph
        .put(&format!(
            "/me/drive/root:/{parent_path}/{}:/content",
            args.filename
        ))
        .raw_body(content)
        .send_json(token)
        .await?;
    Ok(json!({ "item": map_item(&payload) }))
}

/// Open a chunked upload session for a large file.
pub async fn create_upload_session(
    graph: &GraphClient,
    token: &str,
    args: CreateUploadSessionArgs,
) -> Result<Value> {
    let parent_path = normalize_parent_path(args.parent_path.as_deref());
    let body = json!({
        "item": {
            "@microsoft.graph.conflictBehavior": args.conflict_behavior.as_deref().unwrap_or("rename"),
            "name": args.filename,
        }
    });
    let response = graph
        .post(&format!(
            "/me/drive/root:/{parent_path}/{}:/createUploadSession",
            args.filename
        ))
        .json(body)
        .send_json(token)
        .await?;
    Ok(json!({
        "upload_session": {
            "upload_url": response.get("uploadUrl"),
            "expiration_datetime": response.get("expirationDateTime"),
            "next_expected_ranges": response.get("nextExpectedRanges").cloned().unwrap_or_else(|| json!([])),
        }
    }))
}

/// Upload one chunk into an open upload session.
pub async fn upload_chunk(
    graph: &GraphClient,
    token: &str,
    max_base64_bytes: usize,
    args: UploadChunkArgs,
) -> Result<Value> {
    let content = decode_base64_payload(&args.content_base64, max_base64_bytes)?;
    let response = graph
        .request(reqwest::Method::PUT, args.upload_url.clone())
        .header(
            "Content-Range",
            format!("bytes {}-{}/{}", args.chunk_start, args.chunk_end, args.total_size),
        )
        .raw_body(content)
        .send_json(token)
        .await?;

    let in_progress = response.get("nextExpectedRanges").is_some();
    let item = if response.get("id").is_some() {
        map_item(&response)
    } else {
        Value::Null
    };
    Ok(json!({
        "status": if in_progress { "in_progress" } else { "completed" },
        "next_expected_ranges": response.get("nextExpectedRanges").cloned().unwrap_or_else(|| json!([])),
        "item": item,
    }))
}

/// Create a folder under a parent path.
pub async fn create_folder(graph: &GraphClient, token: &str, args: CreateFolderArgs) -> Result<Value> {
    let parent_path = normalize_parent_path(args.parent_path.as_deref());
    let body = json!({
        "name": args.folder_name,
        "folder": {},
        "@microsoft.graph.conflictBehavior": args.conflict_behavior.as_deref().unwrap_or("rename"),
    });
    let response = graph
        .post(&format!("/me/drive/root:/{parent_path}:/children"))
        .json(body)
        .send_json(token)
        .await?;
    Ok(json!({ "item": map_item(&response) }))
}

/// Delete a drive item.
pub async fn delete_item(graph: &GraphClient, token: &str, args: DeleteItemArgs) -> Result<Value> {
    graph.delete(&args.item.url_path()).send_json(token).await?;
    Ok(json!({ "status": "ok" }))
}

/// Create a sharing link for an item.
pub async fn create_share_link(
    graph: &GraphClient,
    token: &str,
    args: CreateShareLinkArgs,
) -> Result<Value> {
    let body = json!({
        "type": args.link_type.as_deref().unwrap_or("view"),
        "scope": args.scope.as_deref().unwrap_or("organization"),
    });
    let response = graph
        .post(&format!("{}/createLink", args.item.url_path()))
        .json(body)
        .send_json(token)
        .await?;
    let link = response.get("link").cloned().unwrap_or_default();
    Ok(json!({
        "link_url": link.get("webUrl"),
        "link_type": link.get("type"),
        "scope": link.get("scope"),
    }))
}

// ── Field mapping ─────────────────────────────────────────────────────────────

fn normalize_parent_path(parent_path: Option<&str>) -> String {
    parent_path
        .unwrap_or("/")
        .trim_matches('/')
        .to_string()
}

fn items(payload: &Value) -> impl Iterator<Item = &Value> {
    payload
        .get("value")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn map_drive(item: &Value) -> Value {
    json!({
        "id": item.get("id"),
        "drive_type": item.get("driveType"),
        "owner": item.pointer("/owner/user/displayName"),
        "web_url": item.get("webUrl"),
    })
}

fn map_item(item: &Value) -> Value {
    json!({
        "id": item.get("id"),
        "name": item.get("name"),
        "path": item.pointer("/parentReference/path"),
        "size_bytes": item.get("size"),
        "is_folder": item.get("folder").is_some(),
        "mime_type": item.pointer("/file/mimeType"),
        "web_url": item.get("webUrl"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ref_addressing_precedence() {
        let by_drive_item = ItemRef {
            drive_id: Some("d1".to_string()),
            item_id: Some("i1".to_string()),
            path: None,
        };
        assert_eq!(by_drive_item.url_path(), "/drives/d1/items/i1");

        let by_drive_path = ItemRef {
            drive_id: Some("d1".to_string()),
            item_id: None,
            path: Some("docs/a.txt".to_string()),
        };
        assert_eq!(by_drive_path.url_path(), "/drives/d1/root:/docs/a.txt");

        let by_item = ItemRef {
            drive_id: None,
            item_id: Some("i1".to_string()),
            path: None,
        };
        assert_eq!(by_item.url_path(), "/me/drive/items/i1");

        let by_path = ItemRef {
            drive_id: None,
            item_id: None,
            path: Some("docs/a.txt".to_string()),
        };
        assert_eq!(by_path.url_path(), "/me/drive/root:/docs/a.txt");

        assert_eq!(ItemRef::default().url_path(), "/me/drive/root");
    }

    #[test]
    fn item_mapping_detects_folders() {
        let folder = json!({"id": "i1", "name": "docs", "folder": {"childCount": 3}});
        assert_eq!(map_item(&folder)["is_folder"], true);

        let file = json!({"id": "i2", "name": "a.txt", "file": {"mimeType": "text/plain"}, "size": 12});
        let mapped = map_item(&file);
        assert_eq!(mapped["is_folder"], false);
        assert_eq!(mapped["mime_type"], "text/plain");
        assert_eq!(mapped["size_bytes"], 12);
    }

    #[test]
    fn parent_path_is_trimmed_of_slashes() {
        assert_eq!(normalize_parent_path(None), "");
        assert_eq!(normalize_parent_path(Some("/")), "");
        assert_eq!(normalize_parent_path(Some("/docs/sub/")), "docs/sub");
    }
}
