pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# DOCWATCH CONFIGURATION
# =============================================================================
# docwatch waits for new customer documents on the document API and keeps a
# download directory holding exactly one current file per customer.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/docwatch/config.yml
#   3. /etc/docwatch/config.yml
#
# Any value may reference an environment variable with the $env{...} syntax.

# =============================================================================
# SOURCE
# =============================================================================
# Document API connection. Credentials are either client_id + client_secret,
# or basic_credentials holding base64(client_id:client_secret).

source:
  base_url: https://api.nbx-stage-westeurope.nitrobox.io
  oauth_realm: demo-mobile-charging
  client_id: replace-me
  client_secret: replace-me
  # basic_credentials: <base64 of client_id:client_secret>
  timeout: 60s
  connect_timeout: 10s
  page_size: 20

# =============================================================================
# WATCH
# =============================================================================
# Defaults for download requests that omit waitSeconds / pollSeconds.

watch:
  default_wait: 120s
  default_poll: 5s
  # Requests asking for a poll interval below this are raised to it
  min_poll: 500ms
  # Requested waits are capped here
  max_wait: 1h
  # Finished watch results stay queryable this long
  session_retention: 10m

# =============================================================================
# ARCHIVE
# =============================================================================
# Directory with one current document per customer. Files are named
# <customer>__<document>__<timestamp>.<extension>.

archive:
  path: /var/lib/docwatch/downloads
  extension: pdf

# =============================================================================
# STORE
# =============================================================================
# Last seen document per customer, kept across restarts.

store:
  path: /var/lib/docwatch/state.json

# =============================================================================
# WEB
# =============================================================================

web:
  listen: "0.0.0.0:8000"
"#
    .to_string()
}
