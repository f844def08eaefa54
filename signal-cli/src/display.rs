//! Terminal Output

use console::style;
use signal_core::signal::PingEvent;
use signal_core::SignalEvent;

/// Prints a success line.
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Prints an informational line.
pub fn info(message: &str) {
    println!("{} {}", style("→").cyan(), message);
}

/// Prints a warning line.
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Prints an error line to stderr.
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Prints one provider event.
pub fn event(event: &SignalEvent) {
    match event {
        SignalEvent::ConnectionChanged { connected: true } => success("Connected"),
        SignalEvent::ConnectionChanged { connected: false } => warning("Disconnected"),
        SignalEvent::NewClientId { client_id } => {
            info(&format!("Client id: {}", style(client_id).bold()))
        }
        SignalEvent::SignalReceived { signals } => {
            for signal in signals {
                println!(
                    "  {} {} {}",
                    style(&signal.event).magenta().bold(),
                    style(signal.scope.as_deref().unwrap_or("-")).dim(),
                    signal.content
                );
            }
        }
        SignalEvent::SubscriptionComplete {
            subscription_id, ..
        } => success(&format!("Subscription {} bound", subscription_id)),
        SignalEvent::VersionChanged { key, version } => {
            println!("  {} {} = {}", style("version").dim(), key, version)
        }
        SignalEvent::Exception { message } => error(message),
        SignalEvent::Ping(PingEvent::PongTimeout) => warning("Server stopped answering pings"),
        SignalEvent::Ping(_) | SignalEvent::CommandReceived { .. } => {}
    }
}
