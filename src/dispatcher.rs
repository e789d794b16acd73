//! The dispatcher
//!
//! Single consumer of the command queue and the only place network state
//! is mutated. Each request runs to completion before the next is taken, so
//! connects, disconnects and scans never overlap.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use common::{Command, Reply};

use crate::context::BridgeContext;
use crate::queue::{BridgeEvent, Request};
use crate::status;

pub struct Dispatcher {
    ctx: Arc<BridgeContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &BridgeContext {
        &self.ctx
    }

    /// Boot action, then serve the queue forever.
    pub fn run(&self) -> ! {
        self.boot();
        info!("dispatcher: started");
        loop {
            let request = self.ctx.queue.take();
            self.handle(request);
        }
    }

    /// Connect with the saved network if auto-connect is on, otherwise scan.
    pub fn boot(&self) {
        let config = self.ctx.config.snapshot();
        if config.auto_connect && config.has_credentials() {
            info!("dispatcher: auto-connecting to {}", config.ssid);
            self.ctx.scan_cache.invalidate();
            if let Err(e) = self.ctx.wifi.connect(&config.ssid, &config.password) {
                error!("dispatcher: auto-connect failed: {}", e);
            }
        } else {
            info!("dispatcher: auto-connect off or no saved network, scanning");
            self.ctx.scan_cache.start(self.ctx.wifi.as_ref());
        }
    }

    /// Handle whatever is queued right now without blocking. Returns the
    /// number of requests handled.
    pub fn run_pending(&self) -> usize {
        let mut handled = 0;
        while let Some(request) = self.ctx.queue.try_take() {
            self.handle(request);
            handled += 1;
        }
        handled
    }

    pub fn handle(&self, request: Request) {
        match request {
            Request::Line(line) => self.process_line(&line),
            Request::Event(event) => self.on_event(event),
        }
    }

    /// Parse and execute one command line. Always sends exactly one reply
    /// for the command itself.
    pub fn process_line(&self, line: &str) {
        // The line may carry a password, only the verb is logged
        match Command::parse(line) {
            Ok(command) => {
                info!("dispatcher: {}", command.verb());
                self.execute(command);
            }
            Err(e) => {
                warn!("dispatcher: rejected command: {}", e);
                self.reply(Reply::from(e));
            }
        }
    }

    fn on_event(&self, event: BridgeEvent) {
        debug!("dispatcher: event {:?}", event);
        match event {
            // Pushing a status here would ask for another scan right away
            BridgeEvent::ScanFailed => {}
            BridgeEvent::ScanFinished { .. }
            | BridgeEvent::AddressAcquired(_)
            | BridgeEvent::LinkDropped { .. }
            | BridgeEvent::PeerSubscribed => self.send_status(),
        }
    }

    fn execute(&self, command: Command) {
        match command {
            Command::Echo(message) => self.reply(Reply::Echo(message)),
            Command::Connect { ssid, password } => self.connect(&ssid, &password, true),
            Command::Reconnect => {
                let config = self.ctx.config.snapshot();
                if config.has_credentials() {
                    self.connect(&config.ssid, &config.password, false);
                } else {
                    self.reply(Reply::error("no saved credentials"));
                }
            }
            Command::Disconnect => {
                self.disconnect();
                self.reply(Reply::status("disconnected"));
                self.send_status();
            }
            Command::Forget => {
                self.disconnect();
                // Failure is logged by the mirror
                let _ = self.ctx.config.save_credentials("", "");
                self.reply(Reply::status("credentials_cleared"));
                self.ctx.scan_cache.start(self.ctx.wifi.as_ref());
            }
            Command::Status => self.send_status(),
            Command::AutoConnect(enabled) => {
                let _ = self.ctx.config.save_auto_connect(enabled);
                self.reply(Reply::AutoConnect {
                    autoconnect: enabled,
                });
            }
            Command::SetName(name) => {
                let _ = self.ctx.config.save_device_name(&name);
                self.reply(Reply::device_name(name));
            }
            Command::Reset => {
                info!("dispatcher: factory reset");
                let _ = self.ctx.config.clear_all();
                self.reply(Reply::factory_reset());
                self.restart();
            }
            Command::Restart => {
                self.reply(Reply::status("restarting..."));
                self.restart();
            }
            Command::Help => self.reply(Reply::help()),
            Command::Led => {
                let led = self.ctx.indicator.toggle();
                self.reply(Reply::Led { led });
            }
        }
    }

    /// Reply first, then drop the old association and start the new one.
    /// Credentials the driver refused are reported and never saved.
    fn connect(&self, ssid: &str, password: &str, persist: bool) {
        info!("dispatcher: connecting to {}", ssid);
        self.reply(Reply::status("connecting"));

        self.ctx.scan_cache.invalidate();
        if let Err(e) = self.ctx.wifi.connect(ssid, password) {
            error!("dispatcher: connect failed: {}", e);
            self.reply(Reply::error(format!("connect failed: {}", e)));
            return;
        }

        if persist {
            let _ = self.ctx.config.save_credentials(ssid, password);
        }
    }

    fn disconnect(&self) {
        self.ctx.scan_cache.invalidate();
        if let Err(e) = self.ctx.wifi.disconnect() {
            error!("dispatcher: disconnect failed: {}", e);
        }
    }

    fn restart(&self) {
        thread::sleep(self.ctx.settings.restart_grace());
        info!("dispatcher: restarting");
        self.ctx.system.restart();
    }

    fn send_status(&self) {
        let report = status::compose(&self.ctx, Instant::now());
        self.reply(report.into());
    }

    fn reply(&self, reply: Reply) {
        // Nobody listening is not an error for the command
        let _ = self.ctx.notifier.send(&reply.render());
    }
}

#[cfg(test)]
mod tests {
    use crate::config::KEY_SSID;
    use crate::sim::SimBridge;
    use crate::store::KvStore;
    use common::NetworkRecord;

    fn bridge() -> SimBridge {
        let sim = SimBridge::new(vec![
            NetworkRecord::new("Home", -52, true),
            NetworkRecord::new("Cafe", -71, false),
        ]);
        sim.attach_peer(517);
        sim.take_replies();
        sim
    }

    #[test]
    fn test_echo_is_raw_text() {
        let sim = bridge();
        sim.dispatcher().process_line(r#"echo("hello there")"#);
        assert_eq!(sim.take_replies(), vec!["hello there".to_string()]);
    }

    #[test]
    fn test_unknown_verb() {
        let sim = bridge();
        let before = sim.context.config.snapshot();

        sim.dispatcher().process_line("foo()");

        assert_eq!(sim.take_replies(), vec![r#"{"error":"unknown: foo"}"#.to_string()]);
        assert_eq!(sim.context.config.snapshot(), before);
        assert!(sim.wifi.connects().is_empty());
    }

    #[test]
    fn test_connect_replies_then_persists() {
        let sim = bridge();
        sim.dispatcher().process_line(r#"connect("Home","pw")"#);

        assert_eq!(sim.take_replies(), vec![r#"{"status":"connecting"}"#.to_string()]);
        assert_eq!(sim.wifi.connects(), vec![("Home".to_string(), "pw".to_string())]);
        assert_eq!(sim.context.config.snapshot().ssid, "Home");
    }

    #[test]
    fn test_refused_connect_is_reported_and_not_saved() {
        let sim = bridge();
        sim.context.config.save_credentials("Home", "pw").unwrap();
        let long_ssid = "s".repeat(40);

        sim.dispatcher()
            .process_line(&format!(r#"connect("{}","pw")"#, long_ssid));

        assert_eq!(
            sim.take_replies(),
            vec![
                r#"{"status":"connecting"}"#.to_string(),
                r#"{"error":"connect failed: ssid or password too long"}"#.to_string(),
            ]
        );
        assert!(sim.wifi.connects().is_empty());
        assert_eq!(sim.context.config.snapshot().ssid, "Home");
        assert_eq!(
            sim.store.get_str(KEY_SSID).unwrap(),
            Some("Home".to_string())
        );
    }

    #[test]
    fn test_connect_without_args_is_usage_error() {
        let sim = bridge();
        sim.context.config.save_credentials("Old", "old-pw").unwrap();

        sim.dispatcher().process_line("connect()");

        assert_eq!(
            sim.take_replies(),
            vec![r#"{"error":"usage: connect(\"ssid\",\"pass\")"}"#.to_string()]
        );
        let config = sim.context.config.snapshot();
        assert_eq!((config.ssid.as_str(), config.password.as_str()), ("Old", "old-pw"));
        assert!(sim.wifi.connects().is_empty());
    }

    #[test]
    fn test_reconnect_needs_saved_credentials() {
        let sim = bridge();
        sim.dispatcher().process_line("reconnect()");
        assert_eq!(
            sim.take_replies(),
            vec![r#"{"error":"no saved credentials"}"#.to_string()]
        );

        sim.context.config.save_credentials("Home", "pw").unwrap();
        let commits = sim.store.commits();
        sim.dispatcher().process_line("reconnect()");
        assert_eq!(sim.take_replies(), vec![r#"{"status":"connecting"}"#.to_string()]);
        assert_eq!(sim.wifi.connects(), vec![("Home".to_string(), "pw".to_string())]);
        // Saved credentials are not written again
        assert_eq!(sim.store.commits(), commits);
    }

    #[test]
    fn test_disconnect_sends_reply_and_status() {
        let sim = bridge();
        sim.dispatcher().process_line("disconnect()");

        let replies = sim.take_replies();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], r#"{"status":"disconnected"}"#);
        assert!(replies[1].starts_with(r#"{"wifi":false"#));
    }

    #[test]
    fn test_forget_clears_credentials_and_scans() {
        let sim = bridge();
        sim.context.config.save_credentials("Home", "pw").unwrap();

        sim.dispatcher().process_line("forget()");

        assert_eq!(
            sim.take_replies(),
            vec![r#"{"status":"credentials_cleared"}"#.to_string()]
        );
        assert_eq!(sim.context.config.snapshot().ssid, "");
        assert!(sim.context.scan_cache.is_scanning());
        assert_eq!(sim.wifi.scans_started(), 1);
    }

    #[test]
    fn test_autoconnect_and_setname() {
        let sim = bridge();
        let dispatcher = sim.dispatcher();

        dispatcher.process_line("autoconnect(false)");
        dispatcher.process_line(r#"setname("My Device")"#);
        dispatcher.process_line("autoconnect(maybe)");

        assert_eq!(
            sim.take_replies(),
            vec![
                r#"{"autoconnect":false}"#.to_string(),
                r#"{"devname":"My Device","note":"restart required"}"#.to_string(),
                r#"{"error":"usage: autoconnect(true|false)"}"#.to_string(),
            ]
        );
        let config = sim.context.config.snapshot();
        assert!(!config.auto_connect);
        assert_eq!(config.device_name, "My Device");
    }

    #[test]
    fn test_store_failure_keeps_last_good_value() {
        let sim = bridge();
        sim.store.set_available(false);

        sim.dispatcher().process_line(r#"setname("Lost")"#);

        // The reply still goes out
        assert_eq!(sim.take_replies().len(), 1);
        assert_eq!(sim.context.config.snapshot().device_name, "ESP32-BLE");
    }

    #[test]
    fn test_reset_clears_config_then_restarts() {
        let sim = bridge();
        sim.context.config.save_credentials("Home", "pw").unwrap();

        sim.dispatcher().process_line("reset()");

        assert_eq!(
            sim.take_replies(),
            vec![r#"{"status":"factory_reset","note":"restarting..."}"#.to_string()]
        );
        assert_eq!(sim.context.config.snapshot().ssid, "");
        assert_eq!(sim.system.restarts(), 1);
    }

    #[test]
    fn test_restart() {
        let sim = bridge();
        sim.dispatcher().process_line("restart()");
        assert_eq!(sim.take_replies(), vec![r#"{"status":"restarting..."}"#.to_string()]);
        assert_eq!(sim.system.restarts(), 1);
    }

    #[test]
    fn test_help_and_led() {
        let sim = bridge();
        let dispatcher = sim.dispatcher();

        dispatcher.process_line("help()");
        dispatcher.process_line("led");
        dispatcher.process_line("led()");

        let replies = sim.take_replies();
        assert!(replies[0].starts_with(r#"{"commands":["#));
        assert_eq!(replies[1], r#"{"led":true}"#);
        assert_eq!(replies[2], r#"{"led":false}"#);
    }

    #[test]
    fn test_boot_scans_without_saved_network() {
        let sim = bridge();
        sim.dispatcher().boot();
        assert_eq!(sim.wifi.scans_started(), 1);
        assert!(sim.wifi.connects().is_empty());
    }

    #[test]
    fn test_boot_autoconnects_with_saved_network() {
        let sim = bridge();
        sim.context.config.save_credentials("Home", "pw").unwrap();

        sim.dispatcher().boot();

        assert_eq!(sim.wifi.connects(), vec![("Home".to_string(), "pw".to_string())]);
        assert_eq!(sim.wifi.scans_started(), 0);
        // Boot does not talk to the peer
        assert!(sim.take_replies().is_empty());
    }

    #[test]
    fn test_boot_respects_autoconnect_off() {
        let sim = bridge();
        sim.context.config.save_credentials("Home", "pw").unwrap();
        sim.context.config.save_auto_connect(false).unwrap();

        sim.dispatcher().boot();

        assert!(sim.wifi.connects().is_empty());
        assert_eq!(sim.wifi.scans_started(), 1);
    }

    #[test]
    fn test_scan_failure_does_not_push_status() {
        let sim = bridge();
        sim.context.wifi_events().scan_failed();

        assert_eq!(sim.dispatcher().run_pending(), 1);
        assert!(sim.take_replies().is_empty());
    }
}
