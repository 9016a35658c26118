//! Builds a signed checkout webhook for local testing, so the payment flow
//! can be exercised without the processor's CLI.
use chrono::Utc;
use clap::{Parser, ValueEnum};
use serde_json::json;
use server::{config::read_secret, payments::sign_payload};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EventType {
    Completed,
    Expired,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    registration_id: String,

    #[arg(long, value_enum, default_value = "completed")]
    event_type: EventType,

    /// Defaults to a fresh fake session id
    #[arg(long)]
    session_id: Option<String>,

    #[arg(long, default_value_t = 2500)]
    amount_cents: u32,

    #[arg(long, default_value = "http://localhost:1111/webhooks/payments")]
    url: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let secret = read_secret("STRIPE_WEBHOOK_SECRET")?;

    let now = Utc::now().timestamp();
    let session_id = args
        .session_id
        .unwrap_or_else(|| format!("cs_test_{now}"));

    let (event_type, status, payment_status) = match args.event_type {
        EventType::Completed => ("checkout.session.completed", "complete", "paid"),
        EventType::Expired => ("checkout.session.expired", "expired", "unpaid"),
    };

    let event = json!({
        "id": format!("evt_test_{now}"),
        "object": "event",
        "type": event_type,
        "created": now,
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "status": status,
                "payment_status": payment_status,
                "client_reference_id": args.registration_id,
                "metadata": { "registration_id": args.registration_id },
                "amount_total": args.amount_cents,
            }
        }
    });

    let payload = serde_json::to_string(&event)?;
    let header = sign_payload(&secret, payload.as_bytes(), now);

    println!("{payload}\n");
    println!("Stripe-Signature: {header}\n");
    println!(
        "curl -X POST {} -H 'Content-Type: application/json' -H 'Stripe-Signature: {header}' -d '{payload}'",
        args.url
    );

    Ok(())
}
