use url::Url;

/// Validate a grant destination URL before any bytes are sent to it.
pub fn validate_grant_url(raw: &str) -> Result<(), String> {
  let parsed = match Url::parse(raw) {
    Ok(u) => u,
    Err(e) => return Err(format!("Invalid destination URL: {}", e)),
  };

  match parsed.scheme() {
    "http" | "https" => {}
    other => return Err(format!("Unsupported destination scheme: {}", other)),
  }

  if parsed.host_str().is_none() {
    return Err("Destination URL has no host".into());
  }

  Ok(())
}
