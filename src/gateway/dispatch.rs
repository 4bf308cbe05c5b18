//! Tool dispatch
//!
//! Routes `tools/call` invocations to their typed handlers. For session-bound
//! tools the dispatcher resolves the caller's session (bearer + opaque
//! handle) and obtains a live access token before the handler runs; mutating
//! tools that carry a replay key are wrapped by the idempotency coordinator.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::auth::{AuthService, TokenService};
use crate::cache::SessionRecord;
use crate::graph::GraphClient;
use crate::idempotency::IdempotencyCoordinator;
use crate::oidc::OidcValidator;
use crate::protocol::Tool;
use crate::session::SessionResolver;
use crate::tools::{calendar, drive, mail, platform};
use crate::{Error, Result};

/// Shared session-addressing arguments accepted by every session-bound tool.
#[derive(Debug, Deserialize)]
struct SessionArgs {
    /// Opaque session handle (`mcp_session_id` kept as a legacy alias)
    #[serde(default, alias = "mcp_session_id")]
    graph_session_id: String,
    /// Bearer fallback for transports that cannot set headers
    #[serde(default)]
    authorization: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BeginPkceArgs {
    scopes: Vec<String>,
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    login_hint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletePkceArgs {
    code: String,
    state: String,
    #[serde(default)]
    redirect_uri: Option<String>,
}

/// Routes tool invocations to registered handlers.
pub struct Dispatcher {
    auth: Arc<AuthService>,
    tokens: Arc<TokenService>,
    sessions: Arc<SessionResolver>,
    idempotency: Arc<IdempotencyCoordinator>,
    oidc: Option<Arc<OidcValidator>>,
    graph: Arc<GraphClient>,
    max_base64_bytes: usize,
}

impl Dispatcher {
    /// Assemble the dispatcher from the gateway's services.
    #[must_use]
    pub fn new(
        auth: Arc<AuthService>,
        tokens: Arc<TokenService>,
        sessions: Arc<SessionResolver>,
        idempotency: Arc<IdempotencyCoordinator>,
        oidc: Option<Arc<OidcValidator>>,
        graph: Arc<GraphClient>,
        max_base64_bytes: usize,
    ) -> Self {
        Self {
            auth,
            tokens,
            sessions,
            idempotency,
            oidc,
            graph,
            max_base64_bytes,
        }
    }

    /// The registered tool catalogue, as reported by `tools/list`.
    #[must_use]
    pub fn catalog() -> Vec<Tool> {
        let entries: &[(&str, &str)] = &[
            ("auth_begin_pkce", "Start a delegated PKCE authorization"),
            ("auth_complete_pkce", "Finish a PKCE authorization and mint a session"),
            ("auth_get_status", "Inspect a session's granted scopes and expiry"),
            ("auth_logout", "Revoke a session"),
            ("system_health", "Gateway liveness probe"),
            ("system_whoami", "Echo the validated caller claims"),
            ("system_get_profile", "Fetch the signed-in user's profile"),
            ("mail_list_folders", "List mail folders"),
            ("mail_list_messages", "List messages"),
            ("mail_get_message", "Fetch one message"),
            ("mail_search_messages", "Full-text message search"),
            ("mail_create_draft", "Create a draft message"),
            ("mail_send_draft", "Send a draft"),
            ("mail_reply", "Reply to a message"),
            ("mail_mark_read", "Set a message's read flag"),
            ("mail_move_message", "Move a message between folders"),
            ("mail_get_attachment", "Fetch one attachment"),
            ("calendar_list_calendars", "List calendars"),
            ("calendar_list_events", "List events in a window"),
            ("calendar_get_event", "Fetch one event"),
            ("calendar_create_event", "Create an event"),
            ("calendar_update_event", "Patch an event"),
            ("calendar_delete_event", "Delete an event"),
            ("calendar_respond_to_invite", "Respond to an invitation"),
            ("calendar_find_availability", "Resolve attendee availability"),
            ("drive_get_default", "Fetch the default drive"),
            ("drive_list_children", "List a folder's children"),
            ("drive_get_item", "Fetch one drive item"),
            ("drive_search", "Search drive items"),
            ("drive_download_file", "Download a file"),
            ("drive_upload_small_file", "Upload a small file"),
            ("drive_create_upload_session", "Open a chunked upload session"),
            ("drive_upload_chunk", "Upload one chunk"),
            ("drive_create_folder", "Create a folder"),
            ("drive_delete_item", "Delete a drive item"),
            ("drive_share_create_link", "Create a sharing link"),
        ];
        entries
            .iter()
            .map(|(name, description)| Tool {
                name: (*name).to_string(),
                description: (*description).to_string(),
            })
            .collect()
    }

    /// Dispatch one `tools/call` invocation.
    ///
    /// `authorization` is the transport `Authorization` header, when present;
    /// arguments may carry it as a fallback.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, [`Error::Validation`] for malformed
    /// arguments, or [`Error::NotFound`] for an unregistered tool.
    #[allow(clippy::too_many_lines)]
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: &Value,
        authorization: Option<&str>,
    ) -> Result<Value> {
        match name {
            "auth_begin_pkce" => {
                self.require_client_token(arguments, authorization).await?;
                let args: BeginPkceArgs = parse_args(arguments)?;
                let response = self
                    .auth
                    .begin_pkce(args.scopes, args.redirect_uri, args.login_hint)
                    .await?;
                to_value(&response)
            }
            "auth_complete_pkce" => {
                self.require_client_token(arguments, authorization).await?;
                let args: CompletePkceArgs = parse_args(arguments)?;
                let response = self
                    .auth
                    .complete_pkce(&args.code, &args.state, args.redirect_uri)
                    .await?;
                to_value(&response)
            }
            "auth_get_status" => {
                let session = self.resolve_session(arguments, authorization).await?;
                Ok(json!({
                    "authenticated": true,
                    "granted_scopes": session.scopes,
                    "expires_at": session.expires_at,
                }))
            }
            "auth_logout" => {
                let session = self.resolve_session(arguments, authorization).await?;
                self.sessions.logout(&session.session_id).await?;
                Ok(json!({ "status": "logged_out" }))
            }
            "system_health" => Ok(json!({ "status": "ok" })),
            "system_whoami" => {
                let Some(oidc) = &self.oidc else {
                    return Ok(json!({ "claims": {}, "validation": "disabled" }));
                };
                let bearer = self.bearer(arguments, authorization)?;
                if bearer.is_empty() {
                    return Err(Error::auth_required("Missing client token"));
                }
                let claims = oidc.validate(&bearer).await?;
                Ok(json!({ "claims": claims }))
            }
            "system_get_profile" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                platform::get_profile(&self.graph, &token).await
            }

            // ── Mail ──────────────────────────────────────────────────────────
            "mail_list_folders" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: mail::ListFoldersArgs = parse_args(arguments)?;
                mail::list_folders(&self.graph, &token, args).await
            }
            "mail_list_messages" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: mail::ListMessagesArgs = parse_args(arguments)?;
                mail::list_messages(&self.graph, &token, args).await
            }
            "mail_get_message" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: mail::GetMessageArgs = parse_args(arguments)?;
                mail::get_message(&self.graph, &token, args).await
            }
            "mail_search_messages" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: mail::SearchMessagesArgs = parse_args(arguments)?;
                mail::search_messages(&self.graph, &token, args).await
            }
            "mail_create_draft" => {
                let (session, token) = self.authorize(arguments, authorization).await?;
                let args: mail::CreateDraftArgs = parse_args(arguments)?;
                let key = args.idempotency_key.clone();
                self.idempotency
                    .wrap(&session, name, key.as_deref(), || {
                        mail::create_draft(&self.graph, &token, args)
                    })
                    .await
            }
            "mail_send_draft" => {
                let (session, token) = self.authorize(arguments, authorization).await?;
                let args: mail::SendDraftArgs = parse_args(arguments)?;
                let key = args.idempotency_key.clone();
                self.idempotency
                    .wrap(&session, name, key.as_deref(), || {
                        mail::send_draft(&self.graph, &token, args)
                    })
                    .await
            }
            "mail_reply" => {
                let (session, token) = self.authorize(arguments, authorization).await?;
                let args: mail::ReplyArgs = parse_args(arguments)?;
                let key = args.idempotency_key.clone();
                self.idempotency
                    .wrap(&session, name, key.as_deref(), || {
                        mail::reply(&self.graph, &token, args)
                    })
                    .await
            }
            "mail_mark_read" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: mail::MarkReadArgs = parse_args(arguments)?;
                mail::mark_read(&self.graph, &token, args).await
            }
            "mail_move_message" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: mail::MoveMessageArgs = parse_args(arguments)?;
                mail::move_message(&self.graph, &token, args).await
            }
            "mail_get_attachment" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: mail::GetAttachmentArgs = parse_args(arguments)?;
                mail::get_attachment(&self.graph, &token, args).await
            }

            // ── Calendar ──────────────────────────────────────────────────────
            "calendar_list_calendars" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: calendar::ListCalendarsArgs = parse_args(arguments)?;
                calendar::list_calendars(&self.graph, &token, args).await
            }
            "calendar_list_events" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: calendar::ListEventsArgs = parse_args(arguments)?;
                calendar::list_events(&self.graph, &token, args).await
            }
            "calendar_get_event" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: calendar::GetEventArgs = parse_args(arguments)?;
                calendar::get_event(&self.graph, &token, args).await
            }
            "calendar_create_event" => {
                let (session, token) = self.authorize(arguments, authorization).await?;
                let args: calendar::CreateEventArgs = parse_args(arguments)?;
                let key = args.transaction_id.clone();
                self.idempotency
                    .wrap(&session, name, key.as_deref(), || {
                        calendar::create_event(&self.graph, &token, args)
                    })
                    .await
            }
            "calendar_update_event" => {
                let (session, token) = self.authorize(arguments, authorization).await?;
                let args: calendar::UpdateEventArgs = parse_args(arguments)?;
                let key = args.idempotency_key.clone();
                self.idempotency
                    .wrap(&session, name, key.as_deref(), || {
                        calendar::update_event(&self.graph, &token, args)
                    })
                    .await
            }
            "calendar_delete_event" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: calendar::DeleteEventArgs = parse_args(arguments)?;
                calendar::delete_event(&self.graph, &token, args).await
            }
            "calendar_respond_to_invite" => {
                let (session, token) = self.authorize(arguments, authorization).await?;
                let args: calendar::RespondToInviteArgs = parse_args(arguments)?;
                let key = args.idempotency_key.clone();
                self.idempotency
                    .wrap(&session, name, key.as_deref(), || {
                        calendar::respond_to_invite(&self.graph, &token, args)
                    })
                    .await
            }
            "calendar_find_availability" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: calendar::FindAvailabilityArgs = parse_args(arguments)?;
                calendar::find_availability(&self.graph, &token, args).await
            }

            // ── Drive ─────────────────────────────────────────────────────────
            "drive_get_default" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                drive::get_default_drive(&self.graph, &token).await
            }
            "drive_list_children" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: drive::ListChildrenArgs = parse_args(arguments)?;
                drive::list_children(&self.graph, &token, args).await
            }
            "drive_get_item" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: drive::GetItemArgs = parse_args(arguments)?;
                drive::get_item(&self.graph, &token, args).await
            }
            "drive_search" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: drive::SearchArgs = parse_args(arguments)?;
                drive::search(&self.graph, &token, args).await
            }
            "drive_download_file" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: drive::DownloadFileArgs = parse_args(arguments)?;
                drive::download_file(&self.graph, &token, self.max_base64_bytes, args).await
            }
            "drive_upload_small_file" => {
                let (session, token) = self.authorize(arguments, authorization).await?;
                let args: drive::UploadSmallFileArgs = parse_args(arguments)?;
                let key = args.idempotency_key.clone();
                let max_bytes = self.max_base64_bytes;
                self.idempotency
                    .wrap(&session, name, key.as_deref(), || {
                        drive::upload_small_file(&self.graph, &token, max_bytes, args)
                    })
                    .await
            }
            "drive_create_upload_session" => {
                let (session, token) = self.authorize(arguments, authorization).await?;
                let args: drive::CreateUploadSessionArgs = parse_args(arguments)?;
                let key = args.idempotency_key.clone();
                self.idempotency
                    .wrap(&session, name, key.as_deref(), || {
                        drive::create_upload_session(&self.graph, &token, args)
                    })
                    .await
            }
            "drive_upload_chunk" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: drive::UploadChunkArgs = parse_args(arguments)?;
                drive::upload_chunk(&self.graph, &token, self.max_base64_bytes, args).await
            }
            "drive_create_folder" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: drive::CreateFolderArgs = parse_args(arguments)?;
                drive::create_folder(&self.graph, &token, args).await
            }
            "drive_delete_item" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: drive::DeleteItemArgs = parse_args(arguments)?;
                drive::delete_item(&self.graph, &token, args).await
            }
            "drive_share_create_link" => {
                let (_, token) = self.authorize(arguments, authorization).await?;
                let args: drive::CreateShareLinkArgs = parse_args(arguments)?;
                drive::create_share_link(&self.graph, &token, args).await
            }

            _ => Err(Error::NotFound(format!("Unknown tool: {name}"))),
        }
    }

    /// Bearer token from the transport header, falling back to arguments.
    fn bearer(&self, arguments: &Value, authorization: Option<&str>) -> Result<String> {
        if let Some(header) = authorization {
            return Ok(extract_bearer(Some(header)));
        }
        let args: SessionArgs = parse_args(arguments)?;
        Ok(extract_bearer(args.authorization.as_deref()))
    }

    /// Validate the caller's bearer for session-free auth tools.
    async fn require_client_token(
        &self,
        arguments: &Value,
        authorization: Option<&str>,
    ) -> Result<()> {
        let Some(oidc) = &self.oidc else {
            return Ok(());
        };
        let bearer = self.bearer(arguments, authorization)?;
        if bearer.is_empty() {
            return Err(Error::auth_required("Missing client token"));
        }
        oidc.validate(&bearer).await?;
        Ok(())
    }

    /// Resolve the caller's session without minting an access token.
    async fn resolve_session(
        &self,
        arguments: &Value,
        authorization: Option<&str>,
    ) -> Result<SessionRecord> {
        let args: SessionArgs = parse_args(arguments)?;
        let bearer = match authorization {
            Some(header) => extract_bearer(Some(header)),
            None => extract_bearer(args.authorization.as_deref()),
        };
        self.sessions.resolve(&args.graph_session_id, &bearer).await
    }

    /// Resolve the caller's session and obtain a live access token.
    async fn authorize(
        &self,
        arguments: &Value,
        authorization: Option<&str>,
    ) -> Result<(SessionRecord, String)> {
        let session = self.resolve_session(arguments, authorization).await?;
        let token = self.tokens.get_access_token(&session).await?;
        Ok((session, token))
    }
}

/// Deserialize a typed argument record; `null` arguments mean "empty".
fn parse_args<T: DeserializeOwned>(arguments: &Value) -> Result<T> {
    let value = if arguments.is_null() {
        json!({})
    } else {
        arguments.clone()
    };
    serde_json::from_value(value).map_err(|e| Error::validation(format!("Invalid arguments: {e}")))
}

/// Strip a `Bearer ` prefix, case-insensitively. Anything else is empty.
fn extract_bearer(authorization: Option<&str>) -> String {
    let Some(value) = authorization else {
        return String::new();
    };
    let trimmed = value.trim();
    if trimmed.len() >= 7 && trimmed[..7].eq_ignore_ascii_case("bearer ") {
        trimmed[7..].trim().to_string()
    } else {
        String::new()
    }
}

/// Serialize a typed response back into the JSON surface.
fn to_value<T: serde::Serialize>(response: &T) -> Result<Value> {
    serde_json::to_value(response).map_err(|e| Error::Internal(format!("encode response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_strips_prefix_case_insensitively() {
        assert_eq!(extract_bearer(Some("Bearer abc")), "abc");
        assert_eq!(extract_bearer(Some("bearer abc")), "abc");
        assert_eq!(extract_bearer(Some("BEARER abc")), "abc");
    }

    #[test]
    fn extract_bearer_rejects_other_schemes() {
        assert_eq!(extract_bearer(Some("Basic abc")), "");
        assert_eq!(extract_bearer(Some("abc")), "");
        assert_eq!(extract_bearer(None), "");
    }

    #[test]
    fn session_args_accept_legacy_alias() {
        let args: SessionArgs = parse_args(&json!({"mcp_session_id": "sid-legacy"})).unwrap();
        assert_eq!(args.graph_session_id, "sid-legacy");

        let args: SessionArgs = parse_args(&json!({"graph_session_id": "sid-new"})).unwrap();
        assert_eq!(args.graph_session_id, "sid-new");
    }

    #[test]
    fn parse_args_treats_null_as_empty_object() {
        let args: SessionArgs = parse_args(&Value::Null).unwrap();
        assert!(args.graph_session_id.is_empty());
    }

    #[test]
    fn parse_args_reports_validation_errors() {
        #[derive(Debug, Deserialize)]
        struct Strict {
            #[allow(dead_code)]
            required: String,
        }
        let err = parse_args::<Strict>(&json!({})).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn catalog_lists_every_registered_tool() {
        let catalog = Dispatcher::catalog();
        let names: Vec<&str> = catalog.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"auth_begin_pkce"));
        assert!(names.contains(&"mail_create_draft"));
        assert!(names.contains(&"calendar_create_event"));
        assert!(names.contains(&"drive_share_create_link"));
        assert_eq!(names.len(), 36);
    }
}
