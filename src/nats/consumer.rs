use anyhow::{Context, Result};
use async_nats::jetstream;
use async_nats::jetstream::consumer::{pull, Consumer, DeliverPolicy};

/// Durable pull consumer positioned at the live tail on first creation.
///
/// The durable name pins the ack floor, so a restarted worker resumes
/// where it left off (at-least-once) instead of replaying retained
/// history from the start of the stream.
pub async fn tail_consumer(
    jetstream: &jetstream::Context,
    stream_name: &str,
    durable_name: &str,
    filter_subject: &str,
) -> Result<Consumer<pull::Config>> {
    let stream = jetstream
        .get_stream(stream_name)
        .await
        .context(format!("Failed to get {} stream", stream_name))?;

    stream
        .get_or_create_consumer(
            durable_name,
            pull::Config {
                durable_name: Some(durable_name.to_string()),
                filter_subject: filter_subject.to_string(),
                deliver_policy: DeliverPolicy::New,
                ..Default::default()
            },
        )
        .await
        .context(format!("Failed to get or create consumer '{}'", durable_name))
}
