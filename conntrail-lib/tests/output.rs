use std::net::Ipv4Addr;

use conntrail_lib::emitter::{ConnectionEvent, DiagnosticEvent, Direction, Event};
use conntrail_lib::output::{EventSink, OutputFormat, WriterSink};
use conntrail_lib::packet::{dns, AnswerData, DnsAnswer, DnsMessage, DnsQuestion};
use conntrail_lib::resolution::{DnsOutcome, ResolutionTable};
use conntrail_lib::Outcome;

fn connection(names: Option<Vec<String>>) -> Event {
    Event::Connection(ConnectionEvent {
        direction: Direction::Outbound,
        outcome: Outcome::TimedOut,
        elapsed_ms: 1600,
        source: Ipv4Addr::new(10, 0, 0, 5),
        destination: Ipv4Addr::new(93, 184, 216, 34),
        destination_port: 443,
        names,
    })
}

fn resolution() -> Result<Event, Box<dyn std::error::Error + Send + Sync>> {
    let mut table = ResolutionTable::new();
    let message = DnsMessage {
        questions: vec![DnsQuestion { name: "example.com".into(), query_type: dns::TYPE_A }],
        answers: vec![DnsAnswer {
            name: "example.com".into(),
            data: AnswerData::Address(Ipv4Addr::new(93, 184, 216, 34)),
        }],
        response_code: dns::RCODE_NO_ERROR,
    };
    match table.process(&message)? {
        DnsOutcome::Updated(record) => Ok(Event::Resolution(record.clone())),
        DnsOutcome::Ignored { .. } => Err("answer ignored".into()),
    }
}

#[test]
fn text_lines() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut sink = WriterSink::new(Vec::new(), OutputFormat::Text);
    sink.emit(resolution()?);
    sink.emit(connection(Some(vec!["example.com".into()])));
    sink.emit(connection(None));
    sink.emit(Event::Diagnostic(DiagnosticEvent { message: "no question".into() }));

    let out = String::from_utf8(sink.into_inner())?;
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        [
            "[DNS] example.com -> 93.184.216.34",
            "[OUTTCP] TIMEOUT(1600ms) S:10.0.0.5 D:93.184.216.34 DP:443 [example.com]",
            "[OUTTCP] TIMEOUT(1600ms) S:10.0.0.5 D:93.184.216.34 DP:443",
            "[ERR] DNS: no question",
        ]
    );
    Ok(())
}

#[test]
fn json_lines() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut sink = WriterSink::new(Vec::new(), OutputFormat::Json);
    sink.emit(connection(None));
    sink.emit(resolution()?);

    let out = String::from_utf8(sink.into_inner())?;
    let mut lines = out.lines();

    let conn: serde_json::Value = serde_json::from_str(lines.next().ok_or("missing line")?)?;
    assert_eq!(conn["kind"], "connection");
    assert_eq!(conn["direction"], "OUTBOUND");
    assert_eq!(conn["outcome"], "TIMEOUT");
    assert_eq!(conn["elapsed_ms"], 1600);
    assert_eq!(conn["destination"], "93.184.216.34");
    assert!(conn.get("names").is_none());

    let dns: serde_json::Value = serde_json::from_str(lines.next().ok_or("missing line")?)?;
    assert_eq!(dns["kind"], "resolution");
    assert_eq!(dns["names"], serde_json::json!(["example.com"]));
    assert_eq!(dns["resolved"]["state"], "address");
    assert_eq!(dns["resolved"]["address"], "93.184.216.34");

    assert!(lines.next().is_none());
    Ok(())
}

#[test]
fn vec_sink_keeps_order() {
    let mut events: Vec<Event> = Vec::new();
    for ms in [1, 2, 3] {
        events.emit(Event::Diagnostic(DiagnosticEvent { message: format!("event {ms}") }));
    }
    let messages: Vec<String> = events.iter().map(ToString::to_string).collect();
    assert_eq!(messages, ["[ERR] DNS: event 1", "[ERR] DNS: event 2", "[ERR] DNS: event 3"]);
}
