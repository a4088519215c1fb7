use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use tiny_http::{Header, Method, Request, Response, Server};
use url::form_urlencoded;

use crate::{ConversationEngine, CredentialStore, Messenger};

pub(crate) const OAUTH_CALLBACK_PATH: &str = "/oauth/google/callback";

const HOLDING_REPLY: &str = "Still working on that, I'll message you in a moment.";
const EMPTY_REPLY: &str = "\u{2705}";

pub(crate) fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) fn twiml_reply(text: &str) -> String {
    format!(
        "<Response><Message>{}</Message></Response>",
        escape_xml(text)
    )
}

fn parse_form(body: &str) -> HashMap<String, String> {
    form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

/// Pull one query parameter out of a request path like `/cb?code=x&y=z`.
fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v)
}

fn xml_response(body: String) -> Result<Response<io::Cursor<Vec<u8>>>, io::Error> {
    let mut response = Response::from_string(body);
    let header = Header::from_bytes("Content-Type", "text/xml; charset=utf-8")
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "invalid header"))?;
    response.add_header(header);
    Ok(response)
}

struct ServerContext {
    engine: Arc<ConversationEngine>,
    credentials: Arc<CredentialStore>,
    messenger: Arc<dyn Messenger>,
    reply_timeout: Duration,
}

pub(crate) fn run_server(
    bind: String,
    port: u16,
    engine: Arc<ConversationEngine>,
    credentials: Arc<CredentialStore>,
    messenger: Arc<dyn Messenger>,
    reply_timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{bind}:{port}");
    let server = Server::http(&addr)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("server: {e}")))?;
    eprintln!("listening on http://{addr}");

    serve(
        server,
        Arc::new(ServerContext {
            engine,
            credentials,
            messenger,
            reply_timeout,
        }),
    );
    Ok(())
}

/// Accept loop. Each request gets its own thread so a slow turn never blocks
/// the queue, in particular the OAuth callback the turn may be waiting on.
fn serve(server: Server, ctx: Arc<ServerContext>) {
    for request in server.incoming_requests() {
        let ctx = ctx.clone();
        thread::spawn(move || handle_request(request, &ctx));
    }
}

fn handle_request(mut request: Request, ctx: &ServerContext) {
    if *request.method() == Method::Get && request.url().starts_with(OAUTH_CALLBACK_PATH) {
        let reply = match query_param(request.url(), "code") {
            Some(code) => match ctx.credentials.complete_authorization(&code) {
                Ok(_) => "Authorized. You can close this tab.".to_string(),
                Err(e) => {
                    eprintln!("[server] authorization exchange failed: {e}");
                    "Authorization failed. Please try the link again.".to_string()
                }
            },
            None => "Missing authorization code.".to_string(),
        };
        let _ = request.respond(Response::from_string(reply));
        return;
    }

    if *request.method() != Method::Post {
        let _ = request.respond(Response::from_string("ok"));
        return;
    }

    let mut body = String::new();
    if let Err(e) = request.as_reader().read_to_string(&mut body) {
        eprintln!("[server] failed to read request body: {e}");
        let _ = request.respond(Response::from_string("bad request").with_status_code(400));
        return;
    }
    let params = parse_form(&body);
    let from = params.get("From").cloned().unwrap_or_default();
    let text = params.get("Body").cloned().unwrap_or_default();
    if from.trim().is_empty() || text.trim().is_empty() {
        let _ = request.respond(Response::from_string("missing body"));
        return;
    }

    let reply = answer_within(
        ctx.engine.clone(),
        ctx.messenger.clone(),
        from.clone(),
        text,
        ctx.reply_timeout,
    );
    match xml_response(twiml_reply(&reply)) {
        Ok(response) => {
            let _ = request.respond(response);
        }
        Err(e) => eprintln!("[server] failed to build reply for {from}: {e}"),
    }
}

/// Run the turn on its own thread and wait up to `reply_timeout` for the
/// answer. A slow turn is never cancelled: when the wait expires we hand back
/// a holding reply and the worker delivers the real answer over the outbound
/// channel once it finishes. The worker picks its delivery path under the
/// `held` lock, so exactly one of the inline reply and the outbound message
/// carries the answer.
fn answer_within(
    engine: Arc<ConversationEngine>,
    messenger: Arc<dyn Messenger>,
    from: String,
    text: String,
    reply_timeout: Duration,
) -> String {
    let (tx, rx) = mpsc::channel::<String>();
    let held = Arc::new(Mutex::new(false));
    let worker_held = held.clone();
    let worker_from = from.clone();
    thread::spawn(move || {
        let outcome = engine.run_turn(&text, Some(&worker_from));
        let reply = outcome
            .final_text
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| EMPTY_REPLY.to_string());
        let held = worker_held.lock().unwrap();
        if *held {
            // Webhook already answered with the holding reply.
            if let Err(e) = messenger.send(&worker_from, &reply) {
                eprintln!("[server] late reply to {worker_from} failed: {e}");
            }
        } else {
            let _ = tx.send(reply);
        }
        drop(held);
    });
    match rx.recv_timeout(reply_timeout) {
        Ok(reply) => reply,
        Err(_) => {
            let mut held = held.lock().unwrap();
            // The worker may have finished between the timeout and here.
            if let Ok(reply) = rx.try_recv() {
                return reply;
            }
            *held = true;
            eprintln!("[server] turn for {from} outlived the webhook wait, holding");
            HOLDING_REPLY.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpStream;
    use std::time::Instant;

    use crate::claude::ModelClient;
    use crate::engine::ToolRunner;
    use crate::oauth::{AuthServer, TokenGrant};
    use crate::types::{AgentMessage, AgentToolCall, ModelRequest, ToolError, ToolOutcome};

    struct CannedModel {
        text: String,
        delay: Duration,
    }

    impl ModelClient for CannedModel {
        fn complete(&self, _request: &ModelRequest) -> Result<AgentMessage, String> {
            thread::sleep(self.delay);
            Ok(AgentMessage {
                role: "assistant".to_string(),
                content: Some(self.text.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
                is_error: None,
            })
        }
    }

    struct NoTools;

    impl ToolRunner for NoTools {
        fn invoke(
            &self,
            _call: &AgentToolCall,
            _notify_target: Option<&str>,
        ) -> Result<ToolOutcome, ToolError> {
            Err(ToolError::ContractViolation("no tools here".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Messenger for RecordingMessenger {
        fn send(&self, to: &str, body: &str) -> Result<(), ToolError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), body.to_string()));
            Ok(())
        }

        fn react(&self, _to: &str, _emoji: &str) -> Result<(), ToolError> {
            Ok(())
        }

        fn send_file(&self, _to: &str, _file_url: &str, _caption: &str) -> Result<(), ToolError> {
            Ok(())
        }
    }

    struct NoAuth;

    impl AuthServer for NoAuth {
        fn authorization_url(&self, scopes: &str) -> String {
            format!("https://auth.example/grant?scope={scopes}")
        }

        fn exchange_code(&self, _code: &str) -> Result<TokenGrant, String> {
            Err("unused".to_string())
        }

        fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, String> {
            Err("unused".to_string())
        }
    }

    fn canned_engine(text: &str, delay: Duration) -> Arc<ConversationEngine> {
        Arc::new(ConversationEngine::new(
            Arc::new(CannedModel {
                text: text.to_string(),
                delay,
            }),
            Arc::new(NoTools),
            "you are a test assistant",
            2,
        ))
    }

    fn wait_for_messages(messenger: &RecordingMessenger, count: usize) -> Vec<(String, String)> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            {
                let sent = messenger.sent.lock().unwrap();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            if Instant::now() >= deadline {
                return messenger.sent.lock().unwrap().clone();
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn escape_xml_passes_plain_text() {
        assert_eq!(escape_xml("hello world"), "hello world");
    }

    #[test]
    fn escape_xml_handles_all_special_chars() {
        assert_eq!(
            escape_xml(r#"<a href="x">&'test'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&apos;test&apos;&lt;/a&gt;"
        );
    }

    #[test]
    fn twiml_reply_wraps_and_escapes() {
        assert_eq!(
            twiml_reply("Tom & Jerry"),
            "<Response><Message>Tom &amp; Jerry</Message></Response>"
        );
    }

    #[test]
    fn parse_form_decodes_twilio_fields() {
        let params = parse_form("From=whatsapp%3A%2B15551234&Body=hi+there");
        assert_eq!(params.get("From").unwrap(), "whatsapp:+15551234");
        assert_eq!(params.get("Body").unwrap(), "hi there");
    }

    #[test]
    fn query_param_finds_the_code() {
        let url = "/oauth/google/callback?state=abc&code=4%2F0AX";
        assert_eq!(query_param(url, "code").unwrap(), "4/0AX");
        assert_eq!(query_param(url, "missing"), None);
        assert_eq!(query_param("/oauth/google/callback", "code"), None);
    }

    #[test]
    fn quick_turn_answers_in_the_webhook_response() {
        let messenger = Arc::new(RecordingMessenger::default());
        let reply = answer_within(
            canned_engine("on it", Duration::ZERO),
            messenger.clone(),
            "whatsapp:+15551234".to_string(),
            "hi".to_string(),
            Duration::from_secs(5),
        );
        assert_eq!(reply, "on it");
        thread::sleep(Duration::from_millis(30));
        assert!(messenger.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn slow_turn_holds_then_messages_the_real_answer() {
        let messenger = Arc::new(RecordingMessenger::default());
        let reply = answer_within(
            canned_engine("booked for 3pm", Duration::from_millis(150)),
            messenger.clone(),
            "whatsapp:+15551234".to_string(),
            "book it".to_string(),
            Duration::from_millis(10),
        );
        assert_eq!(reply, HOLDING_REPLY);
        let sent = wait_for_messages(&messenger, 1);
        assert_eq!(
            sent,
            vec![("whatsapp:+15551234".to_string(), "booked for 3pm".to_string())]
        );
    }

    #[test]
    fn answer_reaches_the_user_exactly_once_on_a_tight_deadline() {
        // Zero timeout makes the webhook wait and the worker finish at
        // effectively the same instant. Whichever side wins, the answer
        // must go out on exactly one path.
        for _ in 0..25 {
            let messenger = Arc::new(RecordingMessenger::default());
            let reply = answer_within(
                canned_engine("done", Duration::ZERO),
                messenger.clone(),
                "whatsapp:+15551234".to_string(),
                "go".to_string(),
                Duration::ZERO,
            );
            if reply == HOLDING_REPLY {
                let sent = wait_for_messages(&messenger, 1);
                assert_eq!(sent.len(), 1);
                assert_eq!(sent[0].1, "done");
            } else {
                assert_eq!(reply, "done");
                thread::sleep(Duration::from_millis(20));
                assert!(messenger.sent.lock().unwrap().is_empty());
            }
        }
    }

    fn test_workspace(tag: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let dir = std::env::temp_dir().join(format!("concierge-server-{tag}-{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn send_raw(port: u16, bytes: &[u8]) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(bytes).unwrap();
        let mut out = Vec::new();
        let _ = stream.read_to_end(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn unreadable_body_gets_a_400_and_the_server_keeps_going() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let workspace = test_workspace("bad-body");
        let ctx = Arc::new(ServerContext {
            engine: canned_engine("hello dana", Duration::ZERO),
            credentials: Arc::new(CredentialStore::open(
                &workspace,
                Arc::new(NoAuth),
                "scope.a".to_string(),
            )),
            messenger: Arc::new(RecordingMessenger::default()),
            reply_timeout: Duration::from_secs(5),
        });
        thread::spawn(move || serve(server, ctx));

        let garbage = send_raw(
            port,
            b"POST /webhook HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4\r\nConnection: close\r\n\r\n\xff\xfe\xfd\xfc",
        );
        assert!(garbage.starts_with("HTTP/1.1 400"), "got: {garbage}");

        let ok = send_raw(
            port,
            b"POST /webhook HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 28\r\nConnection: close\r\n\r\nFrom=whatsapp%3A%2B1&Body=hi",
        );
        assert!(
            ok.contains("<Response><Message>hello dana</Message></Response>"),
            "got: {ok}"
        );
    }
}
