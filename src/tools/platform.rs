//! Platform tools

use serde_json::{Value, json};

use crate::Result;
use crate::graph::GraphClient;

/// Fetch the authenticated user's profile.
pub async fn get_profile(graph: &GraphClient, token: &str) -> Result<Value> {
    let payload = graph
        .get("/me")
        .query("$select", "id,displayName,userPrincipalName,mail")
        .send_json(token)
        .await?;
    Ok(json!({
        "profile": {
            "id": payload.get("id"),
            "display_name": payload.get("displayName"),
            "user_principal_name": payload.get("userPrincipalName"),
            "mail": payload.get("mail"),
        }
    }))
}
