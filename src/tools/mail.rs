//! Mail tools

use serde::Deserialize;
use serde_json::{Value, json};

use crate::graph::GraphClient;
use crate::graph::paging::{Pagination, next_cursor, pagination_query};
use crate::{Error, Result};

fn default_true() -> bool {
    true
}

/// A mail recipient in the tool surface.
#[derive(Debug, Clone, Deserialize)]
pub struct Recipient {
    /// Email address
    pub email: Option<String>,
    /// Display name
    pub name: Option<String>,
}

/// A message body in the tool surface.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    /// `text` or `html`
    pub content_type: Option<String>,
    /// Body content
    pub content: Option<String>,
}

/// Arguments for `mail_list_folders`.
#[derive(Debug, Deserialize)]
pub struct ListFoldersArgs {
    /// Include hidden folders
    #[serde(default)]
    pub include_hidden: bool,
    /// Pagination window
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Arguments for `mail_list_messages`.
#[derive(Debug, Deserialize)]
pub struct ListMessagesArgs {
    /// Restrict to one folder
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Lower bound on `receivedDateTime`
    #[serde(default)]
    pub from_datetime: Option<String>,
    /// Upper bound on `receivedDateTime`
    #[serde(default)]
    pub to_datetime: Option<String>,
    /// Only unread messages
    #[serde(default)]
    pub unread_only: bool,
    /// Explicit `$select` fields
    #[serde(default)]
    pub select_fields: Option<Vec<String>>,
    /// Pagination window
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Arguments for `mail_get_message`.
#[derive(Debug, Deserialize)]
pub struct GetMessageArgs {
    /// Message to fetch
    pub message_id: String,
    /// Include the body
    #[serde(default = "default_true")]
    pub include_body: bool,
    /// Include attachment metadata
    #[serde(default)]
    pub include_attachments: bool,
}

/// Arguments for `mail_search_messages`.
#[derive(Debug, Deserialize)]
pub struct SearchMessagesArgs {
    /// Search query
    #[serde(default)]
    pub query: Option<String>,
    /// Pagination window
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Arguments for `mail_create_draft`.
#[derive(Debug, Deserialize)]
pub struct CreateDraftArgs {
    /// Subject line
    #[serde(default)]
    pub subject: Option<String>,
    /// Body
    #[serde(default)]
    pub body: Option<MessageBody>,
    /// To recipients
    #[serde(default)]
    pub to: Vec<Recipient>,
    /// Cc recipients
    #[serde(default)]
    pub cc: Vec<Recipient>,
    /// Bcc recipients
    #[serde(default)]
    pub bcc: Vec<Recipient>,
    /// Replay key for retried calls
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Arguments for `mail_send_draft`.
#[derive(Debug, Deserialize)]
pub struct SendDraftArgs {
    /// Draft to send
    pub draft_id: String,
    /// Replay key for retried calls
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Arguments for `mail_reply`.
#[derive(Debug, Deserialize)]
pub struct ReplyArgs {
    /// Message to reply to
    pub message_id: String,
    /// Reply body
    pub comment: MessageBody,
    /// Reply-all instead of reply
    #[serde(default)]
    pub reply_all: bool,
    /// Replay key for retried calls
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Arguments for `mail_mark_read`.
#[derive(Debug, Deserialize)]
pub struct MarkReadArgs {
    /// Message to update
    pub message_id: String,
    /// Desired read state
    pub is_read: bool,
}

/// Arguments for `mail_move_message`.
#[derive(Debug, Deserialize)]
pub struct MoveMessageArgs {
    /// Message to move
    pub message_id: String,
    /// Destination folder
    pub destination_folder_id: String,
}

/// Arguments for `mail_get_attachment`.
#[derive(Debug, Deserialize)]
pub struct GetAttachmentArgs {
    /// Owning message
    pub message_id: String,
    /// Attachment to fetch
    pub attachment_id: String,
    /// Inline the content as base64
    #[serde(default)]
    pub include_content_base64: bool,
}

/// List mail folders.
pub async fn list_folders(graph: &GraphClient, token: &str, args: ListFoldersArgs) -> Result<Value> {
    let mut request = graph
        .get("/me/mailFolders")
        .query_pairs(pagination_query(args.pagination.as_ref()));
    if !args.include_hidden {
        request = request.query("$filter", "isHidden eq false");
    }
    let payload = request.send_json(token).await?;

    let folders: Vec<Value> = items(&payload)
        .map(|item| {
            json!({
                "id": item.get("id"),
                "display_name": item.get("displayName"),
                "parent_folder_id": item.get("parentFolderId"),
                "total_item_count": item.get("totalItemCount"),
                "unread_item_count": item.get("unreadItemCount"),
            })
        })
        .collect();
    Ok(json!({ "items": folders, "next_cursor": next_cursor(&payload) }))
}

/// List messages, optionally filtered by folder, window, and read state.
pub async fn list_messages(
    graph: &GraphClient,
    token: &str,
    args: ListMessagesArgs,
) -> Result<Value> {
    let path = match &args.folder_id {
        Some(folder_id) => format!("/me/mailFolders/{folder_id}/messages"),
        None => "/me/messages".to_string(),
    };

    let mut request = graph
        .get(&path)
        .query_pairs(pagination_query(args.pagination.as_ref()));

    let mut filters = Vec::new();
    if let Some(from) = &args.from_datetime {
        filters.push(format!("receivedDateTime ge {from}"));
    }
    if let Some(to) = &args.to_datetime {
        filters.push(format!("receivedDateTime le {to}"));
    }
    if args.unread_only {
        filters.push("isRead eq false".to_string());
    }
    if !filters.is_empty() {
        request = request.query("$filter", filters.join(" and "));
    }
    if let Some(fields) = &args.select_fields {
        request = request.query("$select", fields.join(","));
    }

    let payload = request.send_json(token).await?;
    Ok(json!({
        "items": items(&payload).map(map_message_summary).collect::<Vec<_>>(),
        "next_cursor": next_cursor(&payload),
    }))
}

/// Fetch a single message.
pub async fn get_message(graph: &GraphClient, token: &str, args: GetMessageArgs) -> Result<Value> {
    let mut select = vec![
        "id",
        "subject",
        "from",
        "toRecipients",
        "ccRecipients",
        "bccRecipients",
        "receivedDateTime",
    ];
    if args.include_body {
        select.push("body");
    }
    if args.include_attachments {
        select.push("attachments");
    }

    let payload = graph
        .get(&format!("/me/messages/{}", args.message_id))
        .query("$select", select.join(","))
        .send_json(token)
        .await?;

    let attachments: Vec<Value> = payload
        .get("attachments")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(map_attachment)
        .collect();

    Ok(json!({
        "message": {
            "id": payload.get("id"),
            "subject": payload.get("subject"),
            "from": map_recipient(payload.get("from")),
            "to": map_recipients(payload.get("toRecipients")),
            "cc": map_recipients(payload.get("ccRecipients")),
            "bcc": map_recipients(payload.get("bccRecipients")),
            "received_datetime": payload.get("receivedDateTime"),
            "body": map_body(payload.get("body")),
            "attachments": attachments,
        }
    }))
}

/// Full-text message search.
pub async fn search_messages(
    graph: &GraphClient,
    token: &str,
    args: SearchMessagesArgs,
) -> Result<Value> {
    let query = args
        .query
        .as_deref()
        .filter(|q| !q.is_empty())
        .ok_or_else(|| Error::validation("Query is required"))?;

    let payload = graph
        .get("/me/messages")
        .query("$search", format!("\"{query}\""))
        .query("$count", "true")
        .query_pairs(pagination_query(args.pagination.as_ref()))
        .header("ConsistencyLevel", "eventual")
        .send_json(token)
        .await?;

    Ok(json!({
        "items": items(&payload).map(map_message_summary).collect::<Vec<_>>(),
        "next_cursor": next_cursor(&payload),
    }))
}

/// Create a draft message.
pub async fn create_draft(graph: &GraphClient, token: &str, args: CreateDraftArgs) -> Result<Value> {
    let body = json!({
        "subject": args.subject,
        "body": map_body_out(args.body.as_ref()),
        "toRecipients": args.to.iter().map(map_recipient_out).collect::<Vec<_>>(),
        "ccRecipients": args.cc.iter().map(map_recipient_out).collect::<Vec<_>>(),
        "bccRecipients": args.bcc.iter().map(map_recipient_out).collect::<Vec<_>>(),
    });
    let response = graph.post("/me/messages").json(body).send_json(token).await?;
    Ok(json!({ "draft_id": response.get("id"), "message": response }))
}

/// Send a previously created draft.
pub async fn send_draft(graph: &GraphClient, token: &str, args: SendDraftArgs) -> Result<Value> {
    graph
        .post(&format!("/me/messages/{}/send", args.draft_id))
        .send_json(token)
        .await?;
    Ok(json!({ "status": "sent", "sent_message_id": args.draft_id }))
}

/// Reply (or reply-all) to a message.
pub async fn reply(graph: &GraphClient, token: &str, args: ReplyArgs) -> Result<Value> {
    let endpoint = if args.reply_all { "replyAll" } else { "reply" };
    graph
        .post(&format!("/me/messages/{}/{endpoint}", args.message_id))
        .json(json!({ "comment": args.comment.content.as_deref().unwrap_or("") }))
        .send_json(token)
        .await?;
    Ok(json!({ "status": "sent", "sent_message_id": args.message_id }))
}

/// Set a message's read flag.
pub async fn mark_read(graph: &GraphClient, token: &str, args: MarkReadArgs) -> Result<Value> {
    graph
        .patch(&format!("/me/messages/{}", args.message_id))
        .json(json!({ "isRead": args.is_read }))
        .send_json(token)
        .await?;
    Ok(json!({ "status": "ok" }))
}

/// Move a message to another folder.
pub async fn move_message(graph: &GraphClient, token: &str, args: MoveMessageArgs) -> Result<Value> {
    let response = graph
        .post(&format!("/me/messages/{}/move", args.message_id))
        .json(json!({ "destinationId": args.destination_folder_id }))
        .send_json(token)
        .await?;
    Ok(json!({
        "status": "ok",
        "message_id": response.get("id"),
        "destination_folder_id": args.destination_folder_id,
    }))
}

/// Fetch one attachment's metadata, optionally with inline content.
pub async fn get_attachment(
    graph: &GraphClient,
    token: &str,
    args: GetAttachmentArgs,
) -> Result<Value> {
    let payload = graph
        .get(&format!(
            "/me/messages/{}/attachments/{}",
            args.message_id, args.attachment_id
        ))
        .send_json(token)
        .await?;

    let mut attachment = map_attachment(&payload);
    if args.include_content_base64 {
        attachment["content_base64"] = payload.get("contentBytes").cloned().unwrap_or(Value::Null);
    }
    Ok(json!({ "attachment": attachment }))
}

// ── Field mapping ─────────────────────────────────────────────────────────────

fn items(payload: &Value) -> impl Iterator<Item = &Value> {
    payload
        .get("value")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn map_message_summary(item: &Value) -> Value {
    json!({
        "id": item.get("id"),
        "subject": item.get("subject"),
        "from": map_recipient(item.get("from")),
        "received_datetime": item.get("receivedDateTime"),
        "is_read": item.get("isRead"),
        "has_attachments": item.get("hasAttachments"),
    })
}

fn map_recipient(entry: Option<&Value>) -> Value {
    let Some(entry) = entry.filter(|e| !e.is_null()) else {
        return Value::Null;
    };
    let email = entry.get("emailAddress").cloned().unwrap_or_default();
    json!({ "email": email.get("address"), "name": email.get("name") })
}

fn map_recipients(entries: Option<&Value>) -> Value {
    let mapped: Vec<Value> = entries
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|r| map_recipient(Some(r)))
        .collect();
    Value::Array(mapped)
}

fn map_recipient_out(recipient: &Recipient) -> Value {
    json!({
        "emailAddress": { "address": recipient.email, "name": recipient.name }
    })
}

fn map_body(body: Option<&Value>) -> Value {
    let Some(body) = body.filter(|b| !b.is_null()) else {
        return Value::Null;
    };
    let content_type = body
        .get("contentType")
        .and_then(Value::as_str)
        .unwrap_or("html")
        .to_lowercase();
    json!({ "content_type": content_type, "content": body.get("content") })
}

fn map_body_out(body: Option<&MessageBody>) -> Value {
    let Some(body) = body else {
        return json!({ "contentType": "HTML", "content": "" });
    };
    let content_type = body
        .content_type
        .as_deref()
        .unwrap_or("html")
        .to_uppercase();
    json!({
        "contentType": content_type,
        "content": body.content.as_deref().unwrap_or(""),
    })
}

fn map_attachment(attachment: &Value) -> Value {
    json!({
        "attachment_id": attachment.get("id"),
        "name": attachment.get("name"),
        "content_type": attachment.get("contentType"),
        "size_bytes": attachment.get("size"),
    })
}
