//! Fixtures shared by adapter tests.

use quill_protocol::{
    ActionKind, ActionSubject, CompletionOptions, CursorPosition, PromptPayload, ProviderRequest,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub(crate) fn request_for(subject: ActionSubject) -> ProviderRequest {
    let action = subject.kind();
    ProviderRequest::new(
        PromptPayload {
            action,
            system: "system".to_owned(),
            user: "user".to_owned(),
            subject,
        },
        CompletionOptions::for_action(action),
    )
}

pub(crate) fn completion_request() -> ProviderRequest {
    request_for(ActionSubject::Completion {
        file: Some("main.c".to_owned()),
        cursor: CursorPosition::new(4, 8),
        selection: String::new(),
        line_prefix: "    pri".to_owned(),
        surrounding: "int main() {\n    pri\n}".to_owned(),
        known_functions: vec!["main".to_owned(), "print_total".to_owned()],
        known_variables: vec!["total".to_owned()],
    })
}

pub(crate) fn assert_action(request: &ProviderRequest, action: ActionKind) {
    assert_eq!(request.action(), action);
}

/// Serve a single canned HTTP response on an ephemeral port and return the
/// base URL.
pub(crate) async fn serve_once(status: &'static str, body: &'static str) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut received = Vec::new();
        let mut buffer = [0u8; 4096];
        loop {
            let Ok(read) = socket.read(&mut buffer).await else {
                return;
            };
            if read == 0 {
                break;
            }
            received.extend_from_slice(&buffer[..read]);
            if request_complete(&received) {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });
    Ok(format!("http://{address}"))
}

fn request_complete(received: &[u8]) -> bool {
    let text = String::from_utf8_lossy(received);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    received.len() >= header_end + 4 + content_length
}
