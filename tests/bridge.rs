#![cfg(unix)]

use color_eyre::Result;
use common::{ack, Subscriber};
use futures::SinkExt;
use pretty_assertions::assert_eq;
use serial_bridge::{
    config::Config,
    protocol::{Kind, Notice},
    session::SessionState,
};

mod common;

#[tokio::test]
async fn connect_send_receive_disconnect() -> Result<()> {
    let port = common::start(common::loopback_config()).await;
    let mut subscriber = Subscriber::join(port).await?;

    assert_eq!(subscriber.connect("COM3").await?, ack(Kind::Connect, true));
    assert_eq!(subscriber.send("LED_ON\n").await?, ack(Kind::Send, true));
    assert_eq!(subscriber.next_frame().await?, "LED_ON");
    assert_eq!(subscriber.disconnect().await?, ack(Kind::Disconnect, true));

    subscriber.assert_quiet().await
}

#[tokio::test]
async fn every_subscriber_sees_frames_in_order() -> Result<()> {
    let port = common::start(common::loopback_config()).await;

    let mut writer = Subscriber::join(port).await?;
    let mut watcher = Subscriber::join(port).await?;

    // Once the watcher's request is acked it is surely registered
    assert_eq!(watcher.send("early\n").await?, ack(Kind::Send, false));

    assert_eq!(writer.connect("COM3").await?, ack(Kind::Connect, true));

    let lines = (1..=5).map(lipsum::lipsum_words).collect::<Vec<_>>();
    for line in &lines {
        assert_eq!(writer.send(&format!("{line}\n")).await?, ack(Kind::Send, true));
    }

    for line in &lines {
        assert_eq!(&writer.next_frame().await?, line);
        assert_eq!(&watcher.next_frame().await?, line);
    }

    Ok(())
}

#[tokio::test]
async fn send_while_closed_fails() -> Result<()> {
    let port = common::start(common::loopback_config()).await;
    let mut subscriber = Subscriber::join(port).await?;

    assert_eq!(subscriber.send("hello\n").await?, ack(Kind::Send, false));

    subscriber.assert_quiet().await
}

#[tokio::test]
async fn disconnect_when_closed_is_fine() -> Result<()> {
    let port = common::start(common::loopback_config()).await;
    let mut subscriber = Subscriber::join(port).await?;

    assert_eq!(subscriber.disconnect().await?, ack(Kind::Disconnect, true));
    assert_eq!(subscriber.disconnect().await?, ack(Kind::Disconnect, true));

    Ok(())
}

#[tokio::test]
async fn plain_text_is_written_to_the_device() -> Result<()> {
    let port = common::start(common::loopback_config()).await;
    let mut subscriber = Subscriber::join(port).await?;

    assert_eq!(subscriber.connect("COM3").await?, ack(Kind::Connect, true));

    subscriber.send_text("hello device\n").await?;
    assert_eq!(subscriber.next_ack().await?, ack(Kind::Send, true));
    assert_eq!(subscriber.next_frame().await?, "hello device");

    Ok(())
}

#[tokio::test]
async fn binary_is_written_to_the_device() -> Result<()> {
    let port = common::start(common::loopback_config()).await;
    let mut subscriber = Subscriber::join(port).await?;

    assert_eq!(subscriber.connect("COM3").await?, ack(Kind::Connect, true));

    subscriber
        .socket
        .send(tungstenite::Message::Binary(b"raw bytes\n".to_vec()))
        .await?;
    assert_eq!(subscriber.next_ack().await?, ack(Kind::Send, true));
    assert_eq!(subscriber.next_frame().await?, "raw bytes");

    Ok(())
}

#[tokio::test]
async fn unknown_control_type_is_written_to_the_device() -> Result<()> {
    let port = common::start(common::loopback_config()).await;
    let mut subscriber = Subscriber::join(port).await?;

    assert_eq!(subscriber.connect("COM3").await?, ack(Kind::Connect, true));

    let text = r#"{"type":"reboot"}"#;
    subscriber.send_text(&format!("{text}\n")).await?;
    assert_eq!(subscriber.next_ack().await?, ack(Kind::Send, true));
    assert_eq!(subscriber.next_frame().await?, text);

    Ok(())
}

#[tokio::test]
async fn baud_rate_may_be_a_string() -> Result<()> {
    let port = common::start(common::loopback_config()).await;
    let mut subscriber = Subscriber::join(port).await?;

    subscriber
        .send_text(r#"{"type":"connect","port":"COM3","baudRate":"115200"}"#)
        .await?;
    assert_eq!(subscriber.next_ack().await?, ack(Kind::Connect, true));

    let status = common::get_json(port, "/api/serial/status").await?;
    assert_eq!(status["baud"], 115200);

    Ok(())
}

#[tokio::test]
async fn connect_replaces_the_open_port() -> Result<()> {
    let port = common::start(common::loopback_config()).await;
    let mut subscriber = Subscriber::join(port).await?;

    assert_eq!(subscriber.connect("COM3").await?, ack(Kind::Connect, true));
    assert_eq!(subscriber.connect("COM4").await?, ack(Kind::Connect, true));

    let status = common::get_json(port, "/api/serial/status").await?;
    assert_eq!(status["state"], "open");
    assert_eq!(status["port"], "COM4");
    assert_eq!(status["baud"], 9600);
    assert_eq!(status["subscribers"], 1);

    // The replacement still works
    assert_eq!(subscriber.send("still here\n").await?, ack(Kind::Send, true));
    assert_eq!(subscriber.next_frame().await?, "still here");

    Ok(())
}

#[tokio::test]
async fn losing_the_device_is_announced() -> Result<()> {
    let port = common::start(common::process_config("sh", &["-c", "echo ready; sleep 0.3"])).await;

    let mut watcher = Subscriber::join(port).await?;
    let mut subscriber = Subscriber::join(port).await?;

    assert_eq!(watcher.disconnect().await?, ack(Kind::Disconnect, true));
    assert_eq!(subscriber.connect("board").await?, ack(Kind::Connect, true));

    for s in [&mut subscriber, &mut watcher] {
        assert_eq!(s.next_frame().await?, "ready");

        let Notice::Status {
            state,
            port,
            reason,
        } = s.next_notice().await?;
        assert_eq!(state, SessionState::Closed);
        assert_eq!(port, "board");
        assert!(reason.contains("exited"), "{reason}");
    }

    assert_eq!(subscriber.send("anyone?\n").await?, ack(Kind::Send, false));

    let status = common::get_json(port, "/api/serial/status").await?;
    assert_eq!(status["state"], "closed");
    assert_eq!(status["port"], serde_json::Value::Null);

    Ok(())
}

#[tokio::test]
async fn failed_open_is_acked_as_failure() -> Result<()> {
    let port = common::start(Config::default()).await;
    let mut subscriber = Subscriber::join(port).await?;

    assert_eq!(
        subscriber.connect("/dev/there-is-no-such-port").await?,
        ack(Kind::Connect, false)
    );

    let status = common::get_json(port, "/api/serial/status").await?;
    assert_eq!(status["state"], "closed");

    Ok(())
}

#[tokio::test]
async fn joining_with_a_port_connects() -> Result<()> {
    let port = common::start(common::loopback_config()).await;
    let mut subscriber = Subscriber::join_with(port, "?port=COM3&baudRate=19200").await?;

    assert_eq!(subscriber.next_ack().await?, ack(Kind::Connect, true));

    let status = common::get_json(port, "/api/serial/status").await?;
    assert_eq!(status["port"], "COM3");
    assert_eq!(status["baud"], 19200);

    Ok(())
}

#[tokio::test]
async fn leaving_does_not_close_the_port() -> Result<()> {
    let port = common::start(common::loopback_config()).await;

    let mut watcher = Subscriber::join(port).await?;
    assert_eq!(watcher.disconnect().await?, ack(Kind::Disconnect, true));

    {
        let mut leaver = Subscriber::join(port).await?;
        assert_eq!(leaver.connect("COM3").await?, ack(Kind::Connect, true));
        leaver.socket.close(None).await?;
    }

    assert_eq!(watcher.send("after\n").await?, ack(Kind::Send, true));
    assert_eq!(watcher.next_frame().await?, "after");

    Ok(())
}

#[tokio::test]
async fn session_events_are_streamed() -> Result<()> {
    use futures::StreamExt;
    use serial_bridge::events::{SessionEvent, TimestampedEvent};

    let port = common::start(common::loopback_config()).await;
    let mut subscriber = Subscriber::join(port).await?;

    // Happens before the watcher joins, so it arrives as history
    assert_eq!(subscriber.connect("COM3").await?, ack(Kind::Connect, true));

    let (mut events, _) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/api/serial/events"))
            .await?;

    assert_eq!(subscriber.disconnect().await?, ack(Kind::Disconnect, true));

    let mut seen = vec![];
    while seen.len() < 4 {
        let message = tokio::time::timeout(common::TIMEOUT, events.next())
            .await?
            .ok_or_else(|| color_eyre::eyre::eyre!("Events closed"))??;
        let event: TimestampedEvent = serde_json::from_str(message.to_text()?)?;
        seen.push(event.inner);
    }

    assert_eq!(
        seen,
        vec![
            SessionEvent::Opening {
                port: "COM3".into(),
                baud: 9600
            },
            SessionEvent::Opened {
                port: "COM3".into()
            },
            SessionEvent::Closing {
                port: "COM3".into()
            },
            SessionEvent::Closed {
                port: "COM3".into()
            },
        ]
    );

    Ok(())
}
