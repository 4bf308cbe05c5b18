//! Calendar tools

use serde::Deserialize;
use serde_json::{Value, json};

use crate::graph::GraphClient;
use crate::graph::paging::{Pagination, next_cursor, pagination_query};
use crate::tools::mail::{MessageBody, Recipient};
use crate::{Error, Result};

fn default_true() -> bool {
    true
}

/// Arguments for `calendar_list_calendars`.
#[derive(Debug, Deserialize)]
pub struct ListCalendarsArgs {
    /// Pagination window
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Arguments for `calendar_list_events`.
#[derive(Debug, Deserialize)]
pub struct ListEventsArgs {
    /// Restrict to one calendar
    #[serde(default)]
    pub calendar_id: Option<String>,
    /// Window start (ISO 8601)
    pub start_datetime: String,
    /// Window end (ISO 8601)
    pub end_datetime: String,
    /// Include cancelled events
    #[serde(default)]
    pub include_cancelled: bool,
    /// Pagination window
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Arguments for `calendar_get_event`.
#[derive(Debug, Deserialize)]
pub struct GetEventArgs {
    /// Event to fetch
    pub event_id: String,
}

/// Arguments for `calendar_create_event`.
#[derive(Debug, Deserialize)]
pub struct CreateEventArgs {
    /// Target calendar; default calendar when absent
    #[serde(default)]
    pub calendar_id: Option<String>,
    /// Subject line
    #[serde(default)]
    pub subject: Option<String>,
    /// Body
    #[serde(default)]
    pub body: Option<MessageBody>,
    /// Event start (ISO 8601)
    #[serde(default)]
    pub start_datetime: Option<String>,
    /// Event end (ISO 8601)
    #[serde(default)]
    pub end_datetime: Option<String>,
    /// IANA timezone for start/end
    #[serde(default)]
    pub timezone: Option<String>,
    /// Free-text location
    #[serde(default)]
    pub location: Option<String>,
    /// Invited attendees
    #[serde(default)]
    pub attendees: Vec<Recipient>,
    /// Create an online meeting
    #[serde(default)]
    pub is_online_meeting: bool,
    /// Online meeting provider
    #[serde(default)]
    pub online_meeting_provider: Option<String>,
    /// Replay key for retried calls
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Arguments for `calendar_update_event`.
#[derive(Debug, Deserialize)]
pub struct UpdateEventArgs {
    /// Event to patch
    pub event_id: String,
    /// Raw Graph patch document
    pub patch: Value,
    /// Replay key for retried calls
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Arguments for `calendar_delete_event`.
#[derive(Debug, Deserialize)]
pub struct DeleteEventArgs {
    /// Event to delete
    pub event_id: String,
}

/// Arguments for `calendar_respond_to_invite`.
#[derive(Debug, Deserialize)]
pub struct RespondToInviteArgs {
    /// Invitation to respond to
    pub event_id: String,
    /// `accept`, `tentative`, or `decline`
    pub response: String,
    /// Optional comment to the organiser
    #[serde(default)]
    pub comment: Option<String>,
    /// Notify the organiser
    #[serde(default = "default_true")]
    pub send_response: bool,
    /// Replay key for retried calls
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Arguments for `calendar_find_availability`.
#[derive(Debug, Deserialize)]
pub struct FindAvailabilityArgs {
    /// Attendees whose schedules to inspect
    #[serde(default)]
    pub attendees: Vec<Recipient>,
    /// Window start (ISO 8601, UTC)
    pub start_datetime: String,
    /// Window end (ISO 8601, UTC)
    pub end_datetime: String,
    /// Granularity of the availability view
    #[serde(default)]
    pub interval_minutes: Option<u32>,
}

/// List the user's calendars.
pub async fn list_calendars(
    graph: &GraphClient,
    token: &str,
    args: ListCalendarsArgs,
) -> Result<Value> {
    let payload = graph
        .get("/me/calendars")
        .query_pairs(pagination_query(args.pagination.as_ref()))
        .send_json(token)
        .await?;

    let calendars: Vec<Value> = items(&payload)
        .map(|item| {
            json!({
                "id": item.get("id"),
                "name": item.get("name"),
                "owner": map_owner(item.get("owner")),
            })
        })
        .collect();
    Ok(json!({ "items": calendars, "next_cursor": next_cursor(&payload) }))
}

/// List events inside a time window.
pub async fn list_events(graph: &GraphClient, token: &str, args: ListEventsArgs) -> Result<Value> {
    let path = match &args.calendar_id {
        Some(calendar_id) => format!("/me/calendars/{calendar_id}/events"),
        None => "/me/events".to_string(),
    };

    let mut filters = vec![
        format!("start/dateTime ge '{}'", args.start_datetime),
        format!("end/dateTime le '{}'", args.end_datetime),
    ];
    if !args.include_cancelled {
        filters.push("isCancelled eq false".to_string());
    }

    let payload = graph
        .get(&path)
        .query_pairs(pagination_query(args.pagination.as_ref()))
        .query("$filter", filters.join(" and "))
        .send_json(token)
        .await?;

    Ok(json!({
        "items": items(&payload).map(map_event).collect::<Vec<_>>(),
        "next_cursor": next_cursor(&payload),
    }))
}

/// Fetch a single event.
pub async fn get_event(graph: &GraphClient, token: &str, args: GetEventArgs) -> Result<Value> {
    let payload = graph
        .get(&format!("/me/events/{}", args.event_id))
        .send_json(token)
        .await?;
    Ok(json!({ "event": map_event(&payload) }))
}

/// Create an event.
pub async fn create_event(graph: &GraphClient, token: &str, args: CreateEventArgs) -> Result<Value> {
    let body = json!({
        "subject": args.subject,
        "body": map_body_out(args.body.as_ref()),
        "start": map_datetime(args.start_datetime.as_deref(), args.timezone.as_deref()),
        "end": map_datetime(args.end_datetime.as_deref(), args.timezone.as_deref()),
        "location": { "displayName": args.location },
        "attendees": args.attendees.iter().map(map_attendee).collect::<Vec<_>>(),
        "isOnlineMeeting": args.is_online_meeting,
        "onlineMeetingProvider": args
            .online_meeting_provider
            .as_deref()
            .unwrap_or("teamsForBusiness"),
    });

    let path = match &args.calendar_id {
        Some(calendar_id) => format!("/me/calendars/{calendar_id}/events"),
        None => "/me/events".to_string(),
    };
    let response = graph.post(&path).json(body).send_json(token).await?;
    Ok(json!({ "event_id": response.get("id"), "event": map_event(&response) }))
}

/// Patch an event with a raw Graph patch document.
pub async fn update_event(graph: &GraphClient, token: &str, args: UpdateEventArgs) -> Result<Value> {
    graph
        .patch(&format!("/me/events/{}", args.event_id))
        .json(args.patch)
        .send_json(token)
        .await?;
    Ok(json!({ "status": "ok" }))
}

/// Delete an event.
pub async fn delete_event(graph: &GraphClient, token: &str, args: DeleteEventArgs) -> Result<Value> {
    graph
        .delete(&format!("/me/events/{}", args.event_id))
        .send_json(token)
        .await?;
    Ok(json!({ "status": "ok" }))
}

/// Accept, tentatively accept, or decline an invitation.
pub async fn respond_to_invite(
    graph: &GraphClient,
    token: &str,
    args: RespondToInviteArgs,
) -> Result<Value> {
    let endpoint = match args.response.as_str() {
        "accept" => "accept",
        "tentative" => "tentativelyAccept",
        "decline" => "decline",
        _ => return Err(Error::validation("Invalid response")),
    };

    graph
        .post(&format!("/me/events/{}/{endpoint}", args.event_id))
        .json(json!({
            "comment": args.comment.as_deref().unwrap_or(""),
            "sendResponse": args.send_response,
        }))
        .send_json(token)
        .await?;
    Ok(json!({ "status": "ok" }))
}

/// Resolve attendee availability via `getSchedule`.
pub async fn find_availability(
    graph: &GraphClient,
    token: &str,
    args: FindAvailabilityArgs,
) -> Result<Value> {
    let schedules: Vec<&str> = args
        .attendees
        .iter()
        .filter_map(|a| a.email.as_deref())
        .collect();
    let body = json!({
        "schedules": schedules,
        "startTime": { "dateTime": args.start_datetime, "timeZone": "UTC" },
        "endTime": { "dateTime": args.end_datetime, "timeZone": "UTC" },
        "availabilityViewInterval": args.interval_minutes.unwrap_or(30),
    });

    let response = graph
        .post("/me/calendar/getSchedule")
        .json(body)
        .send_json(token)
        .await?;

    let mut slots = Vec::new();
    for schedule in items(&response) {
        for item in schedule
            .get("scheduleItems")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            slots.push(json!({
                "start_datetime": item.pointer("/start/dateTime"),
                "end_datetime": item.pointer("/end/dateTime"),
                "is_available": item.get("status").and_then(Value::as_str) == Some("free"),
            }));
        }
    }
    Ok(json!({ "slots": slots }))
}

// ── Field mapping ─────────────────────────────────────────────────────────────

fn items(payload: &Value) -> impl Iterator<Item = &Value> {
    payload
        .get("value")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn map_owner(owner: Option<&Value>) -> Value {
    let Some(owner) = owner.filter(|o| !o.is_null()) else {
        return Value::Null;
    };
    let email = owner.get("emailAddress").cloned().unwrap_or_default();
    json!({ "email": email.get("address"), "name": email.get("name") })
}

fn map_body_out(body: Option<&MessageBody>) -> Value {
    let Some(body) = body else {
        return json!({ "contentType": "HTML", "content": "" });
    };
    json!({
        "contentType": body.content_type.as_deref().unwrap_or("html").to_uppercase(),
        "content": body.content.as_deref().unwrap_or(""),
    })
}

fn map_datetime(value: Option<&str>, timezone: Option<&str>) -> Value {
    json!({ "dateTime": value, "timeZone": timezone.unwrap_or("UTC") })
}

fn map_attendee(attendee: &Recipient) -> Value {
    json!({
        "emailAddress": { "address": attendee.email, "name": attendee.name },
        "type": "required",
    })
}

fn map_event(event: &Value) -> Value {
    let attendees: Vec<Value> = event
        .get("attendees")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|attendee| {
            json!({
                "email": attendee.pointer("/emailAddress/address"),
                "name": attendee.pointer("/emailAddress/name"),
            })
        })
        .collect();

    json!({
        "id": event.get("id"),
        "subject": event.get("subject"),
        "body": {
            "content_type": event
                .pointer("/body/contentType")
                .and_then(Value::as_str)
                .unwrap_or("html")
                .to_lowercase(),
            "content": event.pointer("/body/content"),
        },
        "start_datetime": event.pointer("/start/dateTime"),
        "end_datetime": event.pointer("/end/dateTime"),
        "timezone": event.pointer("/start/timeZone"),
        "location": event.pointer("/location/displayName"),
        "attendees": attendees,
        "is_cancelled": event.get("isCancelled"),
    })
}
