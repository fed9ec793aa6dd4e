use std::sync::Arc;

use bounce::{
    account::AccountConfig,
    mailbox::config::{MailboxConfig, MailboxEncryptionKind},
    reconcile::ReconcileBuilder,
    record::{MemoryOutboundStore, OutboundRecord, SubmissionAttempt, SubmissionResponse},
    tracking::MemoryTrackingStore,
};
use bounce_testing_server::{Pop3TestServer, TestMessage};
use chrono::Utc;
use concat_with::concat_line;

#[tokio::main]
pub async fn main() {
    let bounce_message = concat_line!(
        "From: MAILER-DAEMON@mx.example.com",
        "To: sender@example.com",
        "Subject: Undelivered Mail Returned to Sender",
        "Content-Type: multipart/report; report-type=delivery-status; boundary=\"b1\"",
        "",
        "--b1",
        "Content-Type: text/plain; charset=utf-8",
        "",
        "This is the mail system at host mx.example.com.",
        "",
        "Your message could not be delivered to one or more recipients.",
        "",
        "--b1",
        "Content-Type: message/delivery-status",
        "",
        "Reporting-MTA: dns; mx.example.com",
        "Original-Envelope-Id: rec-1",
        "",
        "Final-Recipient: rfc822; jane@example.net",
        "Action: failed",
        "Status: 5.1.1",
        "Diagnostic-Code: smtp; 550 5.1.1 user unknown",
        "",
        "--b1--",
        ""
    );

    let server = Pop3TestServer::start(vec![TestMessage::new("uid-1", bounce_message)]).await;

    let outbound = Arc::new(MemoryOutboundStore::new());
    let tracking = Arc::new(MemoryTrackingStore::new());

    outbound
        .insert(OutboundRecord {
            id: "rec-1".into(),
            to: vec!["jane@example.net".into()],
            subject: "Hello Jane".into(),
            created_at: Utc::now(),
            attempts: vec![SubmissionAttempt {
                to: "jane@example.net".into(),
                success: true,
                response: Some(SubmissionResponse {
                    accepted: vec!["jane@example.net".into()],
                    response: Some("250 2.0.0 Ok: queued as A1B2C3".into()),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        })
        .await;

    let account_config = Arc::new(AccountConfig {
        name: "example".into(),
        mailbox: Some(MailboxConfig {
            host: server.host(),
            port: server.port(),
            encryption: Some(MailboxEncryptionKind::None),
            login: "alice".into(),
            passwd: "password".into(),
        }),
    });

    let report = ReconcileBuilder::new(account_config, outbound.clone(), tracking)
        .with_handler(|evt| async move {
            println!("{evt}");
            Ok(())
        })
        .reconcile()
        .await
        .unwrap();

    println!();
    println!("outcome: {}", report.outcome);
    println!(
        "found: {}, matched: {}, unmatched: {}, failed: {}, evicted: {}",
        report.found, report.matched, report.unmatched, report.failed, report.evicted
    );

    let record = outbound.get("rec-1").await.unwrap();
    println!();
    println!("record rec-1 delivery status: {:?}", record.delivery_status);
    println!("attempt error: {:?}", record.attempts[0].error);
}
