//! HTML-шаблоны писем и документа подтверждения брони.
//!
//! Все подставляемые значения проходят через `escape_html`.

use crate::models::{Booking, Enquiry, Package};

#[derive(Debug, Clone)]
pub struct Email {
    pub subject: String,
    pub html: String,
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn money(amount: f64, currency: &str) -> String {
    format!("{} {:.2}", escape_html(currency), amount)
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\
         <html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body style=\"font-family:Arial,sans-serif;color:#222;max-width:640px;margin:0 auto\">\
         <h2 style=\"color:#0b5394\">{title}</h2>{body}\
         <p style=\"font-size:12px;color:#888\">This message was sent by our travel desk.</p>\
         </body></html>",
        title = escape_html(title),
        body = body
    )
}

fn row(label: &str, value: &str) -> String {
    format!(
        "<tr><td style=\"padding:4px 12px 4px 0\"><strong>{}</strong></td><td>{}</td></tr>",
        escape_html(label),
        value
    )
}

fn booking_rows(booking: &Booking, package_name: &str) -> String {
    let travel_date = booking
        .travel_date
        .map(|d| d.format("%d %b %Y").to_string())
        .unwrap_or_else(|| "To be confirmed".to_string());

    let mut rows = String::new();
    rows.push_str(&row("Reference", &escape_html(&booking.reference)));
    rows.push_str(&row("Package", &escape_html(package_name)));
    rows.push_str(&row("Travel date", &escape_html(&travel_date)));
    rows.push_str(&row("Travellers", &booking.travellers.to_string()));
    rows.push_str(&row("Total", &money(booking.total_amount, &booking.currency)));
    rows.push_str(&row("Status", booking.status.as_str()));
    format!("<table>{}</table>", rows)
}

pub fn booking_confirmation(booking: &Booking, package_name: &str, frontend_url: &str) -> Email {
    let link = format!(
        "{}/booking/confirmation?id={}&reference={}",
        frontend_url.trim_end_matches('/'),
        booking.id,
        booking.reference
    );
    let body = format!(
        "<p>Dear {},</p>\
         <p>Thank you for booking with us. Your payment has been received and your trip is confirmed.</p>\
         {}\
         <p><a href=\"{}\">View and download your confirmation</a></p>",
        escape_html(&booking.customer_name),
        booking_rows(booking, package_name),
        escape_html(&link)
    );
    Email {
        subject: format!("Booking confirmed: {}", booking.reference),
        html: layout("Your booking is confirmed", &body),
    }
}

/// Уведомление для корпоративного ящика о подтверждённой брони.
pub fn booking_notice(booking: &Booking, package_name: &str) -> Email {
    let mut contact = String::new();
    contact.push_str(&row("Customer", &escape_html(&booking.customer_name)));
    contact.push_str(&row("Email", &escape_html(&booking.customer_email)));
    if let Some(phone) = &booking.customer_phone {
        contact.push_str(&row("Phone", &escape_html(phone)));
    }
    if let Some(requests) = &booking.special_requests {
        contact.push_str(&row("Special requests", &escape_html(requests)));
    }

    let body = format!(
        "<p>A new booking has been paid.</p>{}<table>{}</table>",
        booking_rows(booking, package_name),
        contact
    );
    Email {
        subject: format!("New booking {} - {}", booking.reference, package_name),
        html: layout("New confirmed booking", &body),
    }
}

pub fn enquiry_notice(enquiry: &Enquiry, package_name: Option<&str>) -> Email {
    let mut rows = String::new();
    rows.push_str(&row("Name", &escape_html(&enquiry.name)));
    rows.push_str(&row("Email", &escape_html(&enquiry.email)));
    if let Some(phone) = &enquiry.phone {
        rows.push_str(&row("Phone", &escape_html(phone)));
    }
    if let Some(name) = package_name {
        rows.push_str(&row("Package", &escape_html(name)));
    }
    if let Some(destination) = &enquiry.destination {
        rows.push_str(&row("Destination", &escape_html(destination)));
    }
    if let Some(date) = enquiry.travel_date {
        rows.push_str(&row("Travel date", &date.format("%d %b %Y").to_string()));
    }
    if let Some(travellers) = enquiry.travellers {
        rows.push_str(&row("Travellers", &travellers.to_string()));
    }

    let body = format!(
        "<table>{}</table><h3>Message</h3><p style=\"white-space:pre-wrap\">{}</p>",
        rows,
        escape_html(&enquiry.message)
    );
    Email {
        subject: format!("New enquiry from {}", enquiry.name),
        html: layout("New enquiry", &body),
    }
}

pub fn enquiry_acknowledgement(enquiry: &Enquiry) -> Email {
    let body = format!(
        "<p>Dear {},</p>\
         <p>Thank you for getting in touch. One of our travel consultants will contact you \
         within one business day.</p>\
         <p>Your message:</p><blockquote style=\"white-space:pre-wrap\">{}</blockquote>",
        escape_html(&enquiry.name),
        escape_html(&enquiry.message)
    );
    Email {
        subject: "We have received your enquiry".to_string(),
        html: layout("Thanks for your enquiry", &body),
    }
}

pub fn subscription_welcome(email: &str, frontend_url: &str) -> Email {
    let unsubscribe = format!(
        "{}/unsubscribe?email={}",
        frontend_url.trim_end_matches('/'),
        email
    );
    let body = format!(
        "<p>You are now subscribed as <strong>{}</strong>.</p>\
         <p>Expect travel inspiration and exclusive offers in your inbox.</p>\
         <p style=\"font-size:12px\"><a href=\"{}\">Unsubscribe</a></p>",
        escape_html(email),
        escape_html(&unsubscribe)
    );
    Email {
        subject: "Welcome to our travel newsletter".to_string(),
        html: layout("Welcome aboard", &body),
    }
}

/// Документ подтверждения для скачивания (`Content-Disposition: attachment`).
pub fn confirmation_document(booking: &Booking, package: &Package) -> String {
    let mut travellers = String::new();
    if let Some(list) = booking.passenger_details.as_array() {
        for (i, passenger) in list.iter().enumerate() {
            let name = ["first_name", "last_name"]
                .iter()
                .filter_map(|k| passenger.get(*k).and_then(|v| v.as_str()))
                .collect::<Vec<_>>()
                .join(" ");
            let name = if name.is_empty() {
                passenger
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Traveller")
                    .to_string()
            } else {
                name
            };
            travellers.push_str(&format!("<li>{}. {}</li>", i + 1, escape_html(&name)));
        }
    }

    let mut extra = String::new();
    if let Some(days) = package.duration_days {
        extra.push_str(&row("Duration", &format!("{} days", days)));
    }
    if let Some(inclusions) = &package.inclusions {
        extra.push_str(&row("Inclusions", &escape_html(inclusions)));
    }
    if let Some(exclusions) = &package.exclusions {
        extra.push_str(&row("Exclusions", &escape_html(exclusions)));
    }

    let body = format!(
        "<p>Lead traveller: {} ({})</p>{}<table>{}</table>{}\
         <p style=\"font-size:12px\">Issued {}</p>",
        escape_html(&booking.customer_name),
        escape_html(&booking.customer_email),
        booking_rows(booking, &package.name),
        extra,
        if travellers.is_empty() {
            String::new()
        } else {
            format!("<h3>Travellers</h3><ol style=\"list-style:none;padding:0\">{}</ol>", travellers)
        },
        chrono::Utc::now().format("%d %b %Y %H:%M UTC")
    );
    layout(&format!("Booking confirmation {}", booking.reference), &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingStatus, EnquiryStatus};
    use chrono::{NaiveDate, Utc};
    use proptest::prelude::*;

    fn booking() -> Booking {
        Booking {
            id: 7,
            reference: "BK-1A2B3C4D".into(),
            package_id: 1,
            user_id: None,
            customer_name: "Ann <script>".into(),
            customer_email: "ann@example.com".into(),
            customer_phone: None,
            travel_date: NaiveDate::from_ymd_opt(2025, 3, 14),
            travellers: 2,
            total_amount: 2499.5,
            currency: "USD".into(),
            status: BookingStatus::Confirmed,
            payment_intent_id: Some("int_1".into()),
            passenger_details: serde_json::json!([
                {"first_name": "Ann", "last_name": "Lee"},
                {"name": "Bo & Co"}
            ]),
            contact_details: serde_json::json!({}),
            special_requests: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn unescape(s: &str) -> String {
        s.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&")
    }

    proptest! {
        #[test]
        fn escaped_text_has_no_markup(s in ".*") {
            let escaped = escape_html(&s);
            prop_assert!(!escaped.contains('<'));
            prop_assert!(!escaped.contains('>'));
            prop_assert!(!escaped.contains('"'));
            prop_assert!(!escaped.contains('\''));
            prop_assert_eq!(unescape(&escaped), s);
        }
    }

    #[test]
    fn confirmation_email_escapes_customer_input() {
        let email = booking_confirmation(&booking(), "Kenya <Safari>", "https://example.com/");
        assert_eq!(email.subject, "Booking confirmed: BK-1A2B3C4D");
        assert!(email.html.contains("Ann &lt;script&gt;"));
        assert!(email.html.contains("Kenya &lt;Safari&gt;"));
        assert!(email.html.contains("USD 2499.50"));
        assert!(email.html.contains("https://example.com/booking/confirmation?id=7&amp;reference=BK-1A2B3C4D"));
        assert!(!email.html.contains("<script>"));
    }

    #[test]
    fn enquiry_notice_lists_optional_fields_only_when_present() {
        let enquiry = Enquiry {
            id: 1,
            name: "Sam".into(),
            email: "sam@example.com".into(),
            phone: None,
            package_id: None,
            destination: Some("Bali".into()),
            travel_date: None,
            travellers: Some(3),
            message: "Hi\nthere".into(),
            status: EnquiryStatus::New,
            created_at: Utc::now(),
        };
        let email = enquiry_notice(&enquiry, None);
        assert!(email.html.contains("Bali"));
        assert!(!email.html.contains("Phone"));
        assert!(!email.html.contains("Package"));
        assert_eq!(email.subject, "New enquiry from Sam");
    }

    #[test]
    fn confirmation_document_lists_travellers() {
        let package = Package {
            id: 1,
            name: "Kenya Safari".into(),
            slug: "kenya-safari".into(),
            category: "africa-kenya".into(),
            destination_id: None,
            content_html: String::new(),
            price: 2499.5,
            sale_price: None,
            currency: "USD".into(),
            duration_days: Some(7),
            inclusions: Some("Flights".into()),
            exclusions: None,
            hero_image: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let doc = confirmation_document(&booking(), &package);
        assert!(doc.starts_with("<!DOCTYPE html>"));
        assert!(doc.contains("1. Ann Lee"));
        assert!(doc.contains("2. Bo &amp; Co"));
        assert!(doc.contains("7 days"));
    }
}
