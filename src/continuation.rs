use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::{AgentMessage, Messenger, ModelClient, ModelRequest};

/// System prompt for the inner follow-up call. Distinct from the main persona
/// prompt: the model sees an action summary, not the conversation.
pub(crate) const FOLLOW_UP_PROMPT: &str = "You are Sheryl, a personal assistant \
chatting with your user over WhatsApp. A task you started for them has just \
finished. You are given a short summary of what happened. Write one brief, \
natural WhatsApp message telling the user about it, as if you just did it \
yourself. Mention the concrete outcome. Do not sound like an automated \
notification, do not use markdown, and do not ask a question.";

#[derive(Debug)]
struct FollowUp {
    target: String,
    summary: String,
}

/// Accepts completed-action notifications for asynchronous delivery.
pub(crate) trait Notifier: Send + Sync {
    fn enqueue(&self, target: &str, summary: &str);
}

/// Owns the single worker thread that turns action summaries into follow-up
/// messages. One worker means deliveries leave in enqueue order.
pub(crate) struct ContinuationBridge {
    tx: Mutex<mpsc::Sender<FollowUp>>,
}

impl ContinuationBridge {
    pub(crate) fn spawn(
        model: Arc<dyn ModelClient>,
        messenger: Arc<dyn Messenger>,
    ) -> Arc<ContinuationBridge> {
        let (tx, rx) = mpsc::channel::<FollowUp>();
        thread::spawn(move || {
            for item in rx {
                deliver(model.as_ref(), messenger.as_ref(), &item);
            }
            eprintln!("[continuation] worker stopped");
        });
        Arc::new(ContinuationBridge { tx: Mutex::new(tx) })
    }
}

impl Notifier for ContinuationBridge {
    fn enqueue(&self, target: &str, summary: &str) {
        let item = FollowUp {
            target: target.to_string(),
            summary: summary.to_string(),
        };
        let tx = match self.tx.lock() {
            Ok(tx) => tx,
            Err(poisoned) => poisoned.into_inner(),
        };
        if tx.send(item).is_err() {
            eprintln!("[continuation] dropped follow-up: worker gone");
        }
    }
}

/// One attempt per follow-up. A failed send is logged and dropped; a retried
/// send could reach the user twice, which is worse than not at all.
fn deliver(model: &dyn ModelClient, messenger: &dyn Messenger, item: &FollowUp) {
    let text = match compose(model, &item.summary) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("[continuation] compose failed, sending raw summary: {e}");
            item.summary.clone()
        }
    };
    if let Err(e) = messenger.send(&item.target, &text) {
        eprintln!("[continuation] send to {} failed: {e}", item.target);
    }
}

fn compose(model: &dyn ModelClient, summary: &str) -> Result<String, String> {
    let request = ModelRequest {
        messages: vec![
            AgentMessage::system(FOLLOW_UP_PROMPT),
            AgentMessage::user(summary),
        ],
        tools: Vec::new(),
    };
    let message = model.complete(&request)?;
    message
        .content
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| "model returned no text".to_string())
}
