//! One-time OAuth bootstrap for Google Calendar.
//!
//! Prints a consent URL, waits on the local redirect port for Google to
//! deliver the authorization code, exchanges it for a refresh token, and
//! prints the value the operator should place in configuration. Runs
//! entirely outside the server process.

use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use frontdesk_core::config::{AppConfig, GoogleConfig, LoadOptions};

use crate::commands::CommandResult;

const CONSENT_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events";

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "google-auth",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let (Some(client_id), Some(client_secret)) =
        (config.google.client_id.clone(), config.google.client_secret.clone())
    else {
        return CommandResult::failure(
            "google-auth",
            "missing_credentials",
            "set google.client_id and google.client_secret (or the FRONTDESK_GOOGLE_* env vars) \
             before running the authorization flow",
            2,
        );
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "google-auth",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(authorize(
        &config.google,
        &client_id,
        client_secret.expose_secret(),
    ));

    match result {
        Ok(refresh_token) => CommandResult::success(
            "google-auth",
            format!(
                "authorization complete. Add this to your environment or frontdesk.toml:\n\
                 FRONTDESK_GOOGLE_REFRESH_TOKEN={refresh_token}"
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("google-auth", error_class, message, exit_code)
        }
    }
}

async fn authorize(
    google: &GoogleConfig,
    client_id: &str,
    client_secret: &str,
) -> Result<String, (&'static str, String, u8)> {
    let redirect = Url::parse(&google.redirect_uri)
        .map_err(|error| ("redirect_uri", format!("invalid google.redirect_uri: {error}"), 2))?;
    let callback_path = redirect.path().to_string();
    let port = redirect.port_or_known_default().unwrap_or(3000);

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|error| ("listener_bind", format!("could not bind 127.0.0.1:{port}: {error}"), 4))?;

    println!("Open this URL in your browser and grant calendar access:\n");
    println!("{}\n", consent_url(client_id, &google.redirect_uri));
    println!("Waiting for the redirect on {} ...", google.redirect_uri);

    let code = wait_for_code(&listener, &callback_path)
        .await
        .map_err(|message| ("callback", message, 5))?;

    exchange_code(client_id, client_secret, &google.redirect_uri, &code)
        .await
        .map_err(|message| ("token_exchange", message, 6))
}

fn consent_url(client_id: &str, redirect_uri: &str) -> String {
    let mut url = Url::parse(CONSENT_URL).expect("static consent url");
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", CALENDAR_SCOPE)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    url.to_string()
}

#[derive(Debug, PartialEq, Eq)]
enum CallbackOutcome {
    NotCallback,
    Denied(String),
    MissingCode,
    Code(String),
}

fn parse_callback(request_target: &str, callback_path: &str) -> CallbackOutcome {
    let Ok(url) = Url::parse(&format!("http://localhost{request_target}")) else {
        return CallbackOutcome::NotCallback;
    };
    if url.path() != callback_path {
        return CallbackOutcome::NotCallback;
    }

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" => return CallbackOutcome::Denied(value.into_owned()),
            "code" => code = Some(value.into_owned()),
            _ => {}
        }
    }

    match code {
        Some(code) => CallbackOutcome::Code(code),
        None => CallbackOutcome::MissingCode,
    }
}

async fn wait_for_code(listener: &TcpListener, callback_path: &str) -> Result<String, String> {
    loop {
        let (mut stream, _) = listener
            .accept()
            .await
            .map_err(|error| format!("accept on callback listener failed: {error}"))?;

        let mut buffer = vec![0u8; 8192];
        let read = stream
            .read(&mut buffer)
            .await
            .map_err(|error| format!("read from callback connection failed: {error}"))?;
        let request = String::from_utf8_lossy(&buffer[..read]);

        let Some(target) = request.split_whitespace().nth(1) else {
            respond(&mut stream, 400, "Malformed request.").await;
            continue;
        };

        match parse_callback(target, callback_path) {
            CallbackOutcome::NotCallback => {
                respond(
                    &mut stream,
                    200,
                    "Token helper running. Open the consent URL printed in the terminal.",
                )
                .await;
            }
            CallbackOutcome::Denied(error) => {
                respond(&mut stream, 400, "Authorization was denied. Check the terminal.").await;
                return Err(format!("authorization denied: {error}"));
            }
            CallbackOutcome::MissingCode => {
                respond(&mut stream, 400, "Missing authorization code.").await;
            }
            CallbackOutcome::Code(code) => {
                respond(
                    &mut stream,
                    200,
                    "Authorized. Check the terminal for the refresh token; you can close this tab.",
                )
                .await;
                return Ok(code);
            }
        }
    }
}

async fn respond(stream: &mut tokio::net::TcpStream, status: u16, body: &str) {
    let reason = if status == 200 { "OK" } else { "Bad Request" };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn exchange_code(
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
    code: &str,
) -> Result<String, String> {
    let response = reqwest::Client::new()
        .post(TOKEN_URL)
        .form(&[
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(|error| format!("token exchange request failed: {error}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("token endpoint returned status {status}: {body}"));
    }

    let payload: Value = response
        .json()
        .await
        .map_err(|error| format!("token response was malformed: {error}"))?;

    payload["refresh_token"].as_str().map(str::to_owned).ok_or_else(|| {
        "no refresh_token in the response; if this app was authorized before, revoke its \
         access in your Google account and run the flow again"
            .to_string()
    })
}
