use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{AuthError, FlowStage};
use crate::oauth::receiver::{Redirect, RedirectContext, RedirectParams, RedirectReceiver};
#[cfg(test)]
use crate::oauth::receiver::Grant;

pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Interprets what the user pasted: a bare code, a full redirect URL, or a
/// `code=...&state=...` query string.
pub fn parse_pasted_code(input: &str, expected_state: &str) -> Result<Redirect, AuthError> {
    let stage = FlowStage::AwaitingRedirect;
    let input = input.trim();
    if input.is_empty() {
        return Err(AuthError::cancelled(stage, "no authorization code entered"));
    }

    let url = if input.contains("://") || input.starts_with("urn:") {
        reqwest::Url::parse(input).ok()
    } else if input.contains("code=") || input.contains("error=") {
        let query = input.trim_start_matches('?');
        reqwest::Url::parse(&format!("http://127.0.0.1/?{query}")).ok()
    } else {
        None
    };

    match url {
        // A pasted URL or query string must carry its own state.
        Some(url) => RedirectParams::from_url(&url).into_redirect(None),
        // A bare code comes from the user's own terminal rather than a
        // network endpoint; the flow's own state stands in for it.
        None => RedirectParams {
            code: Some(input.to_string()),
            ..Default::default()
        }
        .into_redirect(Some(expected_state)),
    }
}

/// Prints the authorization URL and reads the code back from a terminal.
pub struct OutOfBandReceiver {
    input: Box<dyn AsyncBufRead + Unpin + Send>,
    output: Box<dyn AsyncWrite + Unpin + Send>,
}

impl std::fmt::Debug for OutOfBandReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutOfBandReceiver").finish_non_exhaustive()
    }
}

impl Default for OutOfBandReceiver {
    fn default() -> Self {
        Self::stdio()
    }
}

impl OutOfBandReceiver {
    /// Prompt on stderr, read from stdin.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }

    pub fn new(
        input: impl AsyncBufRead + Unpin + Send + 'static,
        output: impl AsyncWrite + Unpin + Send + 'static,
    ) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
        }
    }

    async fn prompt(&mut self, authorization_url: &str) -> std::io::Result<()> {
        let text = format!(
            "Open this URL in a browser to authorize lmsctl:\n\n    {authorization_url}\n\n\
             Paste the authorization code (or the full redirect URL) here: "
        );
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await
    }
}

#[async_trait]
impl RedirectReceiver for OutOfBandReceiver {
    fn kind(&self) -> &'static str {
        "oob"
    }

    fn redirect_uri(&self) -> String {
        OOB_REDIRECT_URI.to_string()
    }

    async fn await_redirect(&mut self, ctx: &RedirectContext<'_>) -> Result<Redirect, AuthError> {
        let stage = FlowStage::AwaitingRedirect;
        self.prompt(ctx.authorization_url).await?;

        let mut line = String::new();
        let read = tokio::select! {
            read = self.input.read_line(&mut line) => read?,
            _ = tokio::time::sleep(ctx.timeout) => {
                return Err(AuthError::cancelled(
                    stage,
                    format!("timed out after {}s waiting for the authorization code", ctx.timeout.as_secs()),
                ));
            }
            _ = ctx.cancel.cancelled() => return Err(AuthError::cancelled(stage, "login aborted")),
        };
        if read == 0 {
            return Err(AuthError::cancelled(stage, "input closed before a code was entered"));
        }

        parse_pasted_code(&line, ctx.state)
    }
}
