use std::env::args;
use std::process::exit;

use xmpp_parsers::jid::Jid;
use xmpp_parsers::message::{Body, Message, MessageType};
use xmpp_parsers::presence::{Presence, Show as PresenceShow, Type as PresenceType};
use xmpp_session::{
    ConnectParams, Connection, ConnectionOptions, Driver, StanzaFilter, Status, TraceObserver,
};

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = args().collect();
    if args.len() != 4 {
        println!("Usage: {} <service> <jid> <password>", args[0]);
        println!("The service is a BOSH (http, https) or WebSocket (ws, wss) URL.");
        exit(1);
    }

    let mut conn = Connection::new(args[1].clone(), ConnectionOptions::default());
    conn.set_observer(TraceObserver);
    conn.add_handler(StanzaFilter::new().name("message"), |conn, stanza| {
        let Ok(message) = Message::try_from(stanza.clone()) else {
            return Ok(true);
        };
        match (message.from, message.bodies.get("")) {
            (Some(ref from), Some(ref body)) if body.0 == "die" => {
                println!("Secret die command triggered by {}", from);
                conn.disconnect(Some("die"));
            }
            (Some(from), Some(body)) if message.type_ != MessageType::Error => {
                // This is a message we'll echo
                conn.send(make_reply(from, &body.0).into());
            }
            _ => {}
        }
        Ok(true)
    });

    let mut driver = match Driver::new(conn) {
        Ok(driver) => driver,
        Err(e) => {
            println!("Couldn't start the driver: {}", e);
            exit(1);
        }
    };
    let connected = driver.connection_mut().connect(
        &args[2],
        args[3].as_str(),
        |conn, status, condition, _| {
            println!("status: {:?} {:?}", status, condition);
            if status == Status::Connected {
                println!("Online at {}", conn.jid());
                conn.send(make_presence().into());
            }
        },
        ConnectParams::default(),
    );
    if let Err(e) = connected {
        println!("Invalid JID {}: {}", args[2], e);
        exit(1);
    }

    if let Err(e) = driver.run().await {
        println!("Driver failed: {}", e);
    }
}

// Construct a <presence/>
fn make_presence() -> Presence {
    let mut presence = Presence::new(PresenceType::None);
    presence.show = Some(PresenceShow::Chat);
    presence
        .statuses
        .insert(String::from("en"), String::from("Echoing messages."));
    presence
}

// Construct a chat <message/>
fn make_reply(to: Jid, body: &str) -> Message {
    let mut message = Message::new(Some(to));
    message.bodies.insert(String::new(), Body(body.to_owned()));
    message
}
