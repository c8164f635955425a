// src/notify.rs

use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::{MailBranding, SmtpConfig};
use crate::models::{days_remaining, PaymentClaim};
use crate::plans::Plan;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("message build error: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Outbound user mail. Callers never branch on the result beyond logging it,
/// see [`notify_best_effort`].
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn payment_received(&self, claim: &PaymentClaim, plan: &Plan) -> Result<(), NotifyError>;

    async fn subscription_activated(&self, claim: &PaymentClaim, plan: &Plan) -> Result<(), NotifyError>;
}

/// Awaits a notification and swallows its failure.
pub async fn notify_best_effort<F>(what: &str, recipient: &str, send: F)
where
    F: Future<Output = Result<(), NotifyError>>,
{
    match send.await {
        Ok(()) => log::info!("{what} email sent to {recipient}"),
        Err(e) => log::warn!("{what} email to {recipient} failed, continuing: {e}"),
    }
}

/// Used when SMTP is not configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn payment_received(&self, claim: &PaymentClaim, plan: &Plan) -> Result<(), NotifyError> {
        log::info!(
            "mail disabled: payment received email skipped claim_id={} email={} plan={}",
            claim.id,
            claim.email,
            plan.id
        );
        Ok(())
    }

    async fn subscription_activated(&self, claim: &PaymentClaim, plan: &Plan) -> Result<(), NotifyError> {
        log::info!(
            "mail disabled: activation email skipped claim_id={} email={} plan={}",
            claim.id,
            claim.email,
            plan.id
        );
        Ok(())
    }
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    branding: MailBranding,
}

impl SmtpNotifier {
    pub fn new(smtp: &SmtpConfig, branding: MailBranding) -> Result<Self, NotifyError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?.port(smtp.port);
        if let (Some(user), Some(password)) = (&smtp.user, &smtp.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        let from = format!("\"{}\" <{}>", branding.app_name, smtp.from).parse::<Mailbox>()?;

        Ok(SmtpNotifier {
            transport: builder.build(),
            from,
            branding,
        })
    }

    async fn send(&self, to: &str, subject: String, html: String) -> Result<(), NotifyError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse::<Mailbox>()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)?;

        self.transport.send(message).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn payment_received(&self, claim: &PaymentClaim, plan: &Plan) -> Result<(), NotifyError> {
        let subject = format!("Payment Received - {} {}", self.branding.app_name, plan.name);
        self.send(&claim.email, subject, payment_received_html(&self.branding, claim, plan))
            .await
    }

    async fn subscription_activated(&self, claim: &PaymentClaim, plan: &Plan) -> Result<(), NotifyError> {
        let subject = format!("Your {} Subscription is Now Active!", self.branding.app_name);
        self.send(&claim.email, subject, activation_html(&self.branding, claim, plan))
            .await
    }
}

const STYLE: &str = "body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; } \
     .container { max-width: 600px; margin: 0 auto; padding: 20px; } \
     .header { background: #2e7d4a; color: white; padding: 30px; text-align: center; } \
     .content { background: #f8f9fa; padding: 30px; } \
     .info-box { background: white; padding: 20px; margin: 20px 0; border-left: 4px solid #4caf50; } \
     .footer { text-align: center; margin-top: 30px; color: #666; font-size: 0.9rem; }";

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn payment_received_html(branding: &MailBranding, claim: &PaymentClaim, plan: &Plan) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head><style>{STYLE}</style></head>
<body><div class="container">
  <div class="header"><h1>Payment Received!</h1><p>Thank you for subscribing to {app}</p></div>
  <div class="content">
    <h2>Hello {name},</h2>
    <p>We have received your payment for {app} {plan}.</p>
    <div class="info-box">
      <h3>Payment Details:</h3>
      <p><strong>Transaction Code:</strong> {code}</p>
      <p><strong>Amount Paid:</strong> KSh {amount}</p>
      <p><strong>Plan:</strong> {plan}</p>
      <p><strong>Till Number:</strong> {till}</p>
      <p><strong>Payment Date:</strong> {date}</p>
      <p><strong>Payment ID:</strong> {id}</p>
    </div>
    <div class="info-box">
      <h3>What's Next?</h3>
      <p>Your payment is being verified.</p>
      <p>You'll receive another email when your subscription is activated.</p>
      <p>Activation typically takes 2-24 hours.</p>
      <p>For immediate activation, WhatsApp your M-Pesa confirmation to: <strong>{whatsapp}</strong></p>
    </div>
    <p>If you have any questions, reply to this email or contact {support}.</p>
  </div>
  <div class="footer"><p>{app}</p></div>
</div></body></html>"#,
        app = escape(&branding.app_name),
        name = escape(&claim.full_name),
        plan = plan.name,
        code = escape(&claim.transaction_code),
        amount = claim.amount,
        till = escape(&claim.till_number),
        date = claim.submitted_at.format("%d %b %Y"),
        id = claim.id,
        whatsapp = escape(&branding.support_whatsapp),
        support = escape(&branding.support_email),
    )
}

pub fn activation_html(branding: &MailBranding, claim: &PaymentClaim, plan: &Plan) -> String {
    let now = Utc::now();
    format!(
        r#"<!DOCTYPE html>
<html><head><style>{STYLE}</style></head>
<body><div class="container">
  <div class="header"><h1>Subscription Activated!</h1></div>
  <div class="content">
    <h2>Hello {name},</h2>
    <p>Your {plan} subscription has been verified and activated.</p>
    <div class="info-box">
      <h3>Subscription Details:</h3>
      <ul>
        <li><strong>Plan:</strong> {plan}</li>
        <li><strong>Activated:</strong> {activated}</li>
        <li><strong>Expires:</strong> {expires}</li>
        <li><strong>Days remaining:</strong> {days} days</li>
      </ul>
    </div>
    <p><a href="{frontend}">Start Playing Now!</a></p>
    <div class="info-box">
      <h3>Need help?</h3>
      <ul>
        <li>Email: {support}</li>
        <li>WhatsApp: {whatsapp}</li>
        <li>Website: {frontend}</li>
      </ul>
    </div>
  </div>
  <div class="footer"><p>{app}</p></div>
</div></body></html>"#,
        app = escape(&branding.app_name),
        name = escape(&claim.full_name),
        plan = plan.name,
        activated = claim.verified_at.unwrap_or(now).format("%d %b %Y"),
        expires = claim.expires_at.format("%d %b %Y"),
        days = days_remaining(claim.expires_at, now),
        frontend = escape(&branding.frontend_url),
        support = escape(&branding.support_email),
        whatsapp = escape(&branding.support_whatsapp),
    )
}
