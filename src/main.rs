//! Demonstration binary: provisions an in-memory broker, publishes the
//! sample message mix, and consumes it through three differently configured
//! subscribers.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

use pubrelay::broker::{BrokerClient, MemoryBroker};
use pubrelay::codec::{Event, LogRecord, Notification, Payload, TaggedPayload, UserAction};
use pubrelay::config::{BrokerSettings, DeliverySettings, Settings, load_config};
use pubrelay::manager::Manager;
use pubrelay::subscriber::{DeliveryHandle, MessageHandler, RetryingHandler};
use pubrelay::utils::{Error, Result, logging};

/// Routes each delivery on its `tipo` tag, mirroring what a real consumer
/// would do with the typed payload.
struct RoutingHandler;

impl MessageHandler for RoutingHandler {
    fn handle(&self, delivery: DeliveryHandle) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let payload = match delivery.decode_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    error!(
                        message_id = %delivery.id(),
                        error = %err,
                        "rejecting message that does not decode"
                    );
                    delivery.reject();
                    return;
                }
            };
            match &payload {
                Payload::Tagged(TaggedPayload::Notification(n)) => info!(
                    message_id = %delivery.id(),
                    titulo = n.titulo.as_deref().unwrap_or_default(),
                    mensagem = n.mensagem.as_deref().unwrap_or_default(),
                    "notification"
                ),
                Payload::Tagged(TaggedPayload::UserAction(u)) => info!(
                    message_id = %delivery.id(),
                    acao = u.acao.as_deref().unwrap_or_default(),
                    "user action"
                ),
                Payload::Tagged(TaggedPayload::Event(e)) => info!(
                    message_id = %delivery.id(),
                    acao = e.acao.as_deref().unwrap_or_default(),
                    usuario = e.usuario.as_deref().unwrap_or_default(),
                    "event"
                ),
                Payload::Tagged(TaggedPayload::Log(l)) => info!(
                    message_id = %delivery.id(),
                    level = l.level.as_deref().unwrap_or_default(),
                    mensagem = l.mensagem.as_deref().unwrap_or_default(),
                    "log record"
                ),
                Payload::Other(map) => {
                    // Hoisted out of the macro, where `Value` resolves to
                    // tracing's field trait instead of serde_json's type.
                    let tipo = map.get("tipo").and_then(Value::as_str).unwrap_or("unknown");
                    info!(message_id = %delivery.id(), tipo, "untyped message");
                }
            }
            delivery.accept();
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info");

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(err) => {
            warn!(error = %err, "configuration incomplete, using demo settings");
            demo_settings()
        }
    };
    let topic_name = settings.broker.topic_name.clone();

    // A real deployment would hand the manager a cloud client here; the demo
    // provisions the in-memory broker with the same resources instead.
    let broker = MemoryBroker::new();
    broker.create_topic(&topic_name).await;
    for name in &settings.broker.subscription_names {
        broker.create_subscription(&topic_name, name).await;
    }
    let client: Arc<dyn BrokerClient> = Arc::new(broker.clone());

    let mut manager = Manager::from_settings(client, &settings).await?;

    manager.check_topic().await?;
    for name in &settings.broker.subscription_names {
        manager.check_subscription(name).await?;
    }
    info!(topics = ?manager.list_topics().await?, "topics available");
    info!(subscriptions = ?manager.list_subscriptions().await?, "subscriptions available");

    // Publish before anyone listens; the backlog drains once the
    // subscribers attach.
    let publisher = manager.publisher();
    let mut message_ids = Vec::new();

    let welcome = Payload::from(TaggedPayload::Notification(Notification {
        titulo: Some("Bem-vindo!".to_string()),
        mensagem: Some("Sistema de mensageria inicializado".to_string()),
        ..Default::default()
    }));
    message_ids.push(publisher.publish_message(&welcome).await?.message_id);

    let mut dados = Map::new();
    dados.insert("nome".to_string(), json!("Felipe"));
    dados.insert("email".to_string(), json!("felipe@example.com"));
    dados.insert("curso".to_string(), json!("Sistemas Distribuídos"));
    let signup = Payload::from(TaggedPayload::UserAction(UserAction {
        acao: Some("cadastro".to_string()),
        dados: Some(dados),
        ..Default::default()
    }));
    message_ids.push(publisher.publish_message(&signup).await?.message_id);

    let batch = [
        event("login", "user1"),
        event("logout", "user2"),
        event("update", "user3"),
        log_record("info", "Sistema operando normalmente"),
        log_record("warning", "Uso de memória elevado"),
    ];
    let receipts = publisher.publish_batch(&batch).await?;
    message_ids.extend(receipts.into_iter().map(|r| r.message_id));

    // A producer that does not use the typed payloads still gets through.
    let mut free_form = Map::new();
    free_form.insert("tipo".to_string(), json!("teste"));
    free_form.insert("numero".to_string(), json!(1));
    let free_form = Payload::Other(free_form);
    message_ids.push(publisher.publish_message(&free_form).await?.message_id);

    let published = message_ids.len();
    info!(
        topic = publisher.topic_name(),
        count = published,
        "sample messages published"
    );

    // First subscription routes on the payload type, the rest use the
    // default handler.
    for (index, name) in settings.broker.subscription_names.iter().enumerate() {
        let Some(subscriber) = manager.subscriber(name) else {
            continue;
        };
        if index == 0 {
            subscriber.start_listening(Arc::new(RoutingHandler)).await?;
        } else {
            subscriber.start_with_default_handler().await?;
        }
        info!(subscription = subscriber.subscription_name(), "subscriber listening");
    }

    for name in &settings.broker.subscription_names {
        if wait_for_acks(&broker, name, published).await {
            info!(subscription = %name, "backlog drained");
        } else {
            warn!(subscription = %name, "timed out waiting for the backlog to drain");
        }
    }

    // A consumer that fails transiently: the retrying handler keeps the
    // delivery open across attempts and only then acknowledges.
    broker.create_subscription(&topic_name, "retry-demo").await;
    let retry_subscriber = manager.add_subscriber("retry-demo").await?;
    let policy = settings.retry_policy();
    let succeed_at = policy.max_attempts();
    let flaky = RetryingHandler::new(policy, move |delivery: Arc<DeliveryHandle>, attempt| {
        async move {
            if attempt < succeed_at {
                Err(Error::processing(format!(
                    "simulated transient failure on attempt {attempt}"
                )))
            } else {
                info!(message_id = %delivery.id(), attempt, "flaky consumer succeeded");
                Ok(())
            }
        }
    });
    retry_subscriber.start_listening(Arc::new(flaky)).await?;

    let retry_message = event("reprocessar", "worker-1");
    manager.publisher().publish_message(&retry_message).await?;
    if wait_for_acks(&broker, "retry-demo", 1).await {
        info!("retrying consumer confirmed its message");
    } else {
        error!("retrying consumer never confirmed its message");
    }

    manager.stop_all().await?;
    info!("demo complete");
    Ok(())
}

/// Built-in settings so the demo runs without a config file or environment.
fn demo_settings() -> Settings {
    Settings {
        broker: BrokerSettings {
            project_id: "demo-project".to_string(),
            topic_name: "sistemas-distribuidos".to_string(),
            subscription_names: vec!["mysub-1".to_string(), "mysub-2".to_string()],
            credentials_path: None,
        },
        delivery: DeliverySettings::default(),
    }
}

fn event(acao: &str, usuario: &str) -> Payload {
    Payload::from(TaggedPayload::Event(Event {
        acao: Some(acao.to_string()),
        usuario: Some(usuario.to_string()),
        ..Default::default()
    }))
}

fn log_record(level: &str, mensagem: &str) -> Payload {
    Payload::from(TaggedPayload::Log(LogRecord {
        level: Some(level.to_string()),
        mensagem: Some(mensagem.to_string()),
        ..Default::default()
    }))
}

/// Polls the broker's ack counter until it reaches `expected` or ten
/// seconds pass.
async fn wait_for_acks(broker: &MemoryBroker, subscription: &str, expected: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if broker.acked_count(subscription).await >= expected {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(25)).await;
    }
}
