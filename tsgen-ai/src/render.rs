//! Document rendering
//!
//! Deterministic: the same field store always renders the same text.
//! Preview output marks unresolved values inline; final output refuses
//! any unresolved field.

use thiserror::Error;

use crate::schema::term_sheet::TERM_SHEET_KIND;
use crate::schema::DocumentSchema;
use crate::session::FieldStore;
use crate::types::{format_number, ExtractedField, FieldValue};

pub const TO_BE_PROVIDED: &str = "[To be provided]";
const SIGNATURE_BLANK: &str = "_________________________";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Review copy; unresolved values shown as `[NEEDS REVIEW: ...]`
    Preview,
    /// Output document; every field must be resolved
    Final,
}

#[derive(Debug, Error, PartialEq)]
pub enum RenderError {
    #[error("cannot render final document with unresolved fields: {}", .0.join(", "))]
    Unresolved(Vec<String>),

    #[error("field {0} is not in the field store")]
    MissingField(String),
}

pub trait Renderer: Send + Sync {
    fn render(
        &self,
        schema: &DocumentSchema,
        fields: &FieldStore,
        mode: RenderMode,
    ) -> Result<String, RenderError>;
}

/// Markdown renderer: contract prose for term sheets, a field listing otherwise
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn render(
        &self,
        schema: &DocumentSchema,
        fields: &FieldStore,
        mode: RenderMode,
    ) -> Result<String, RenderError> {
        if mode == RenderMode::Final {
            let unresolved = fields.unresolved();
            if !unresolved.is_empty() {
                return Err(RenderError::Unresolved(unresolved));
            }
        }

        let view = FieldView { fields, mode };
        if schema.kind() == TERM_SHEET_KIND {
            render_term_sheet(&view)
        } else {
            Ok(render_listing(schema, &view))
        }
    }
}

/// How a value should be printed
#[derive(Clone, Copy)]
enum Format {
    Plain,
    /// `$5,000,000`
    Money,
    /// `$1.25`
    Price,
    /// `20%`
    Percent,
    /// `March 3, 2025`
    LongDate,
}

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

fn format_value(value: &FieldValue, format: Format) -> String {
    match (format, value) {
        (Format::Money, FieldValue::Number(n)) => format!("${}", group_thousands(n.round() as i64)),
        (Format::Price, FieldValue::Number(n)) => format!("${:.2}", n),
        (Format::Percent, FieldValue::Number(n)) => format!("{}%", format_number(*n)),
        (Format::LongDate, FieldValue::Date(d)) => d.format("%B %-d, %Y").to_string(),
        (_, other) => other.to_string(),
    }
}

struct FieldView<'a> {
    fields: &'a FieldStore,
    mode: RenderMode,
}

impl FieldView<'_> {
    fn field(&self, section: &str, field: &str) -> Result<&ExtractedField, RenderError> {
        self.fields
            .get(section, field)
            .ok_or_else(|| RenderError::MissingField(format!("{}.{}", section, field)))
    }

    /// Underlying value regardless of resolution
    fn raw(&self, section: &str, field: &str) -> Result<Option<&FieldValue>, RenderError> {
        Ok(self.field(section, field)?.value.as_ref())
    }

    /// Lowercased text of the underlying value, for clause selection
    fn choice(&self, section: &str, field: &str) -> Result<Option<String>, RenderError> {
        Ok(self.raw(section, field)?.map(|v| v.to_string().to_lowercase()))
    }

    /// Display text, with `blank` for a confirmed-empty field
    fn text_or(
        &self,
        section: &str,
        field: &str,
        format: Format,
        blank: &str,
    ) -> Result<String, RenderError> {
        let f = self.field(section, field)?;
        let text = match (&f.value, f.is_resolved()) {
            (Some(v), true) => format_value(v, format),
            (None, true) => blank.to_string(),
            (Some(v), false) => format!("[NEEDS REVIEW: {}]", format_value(v, format)),
            (None, false) => TO_BE_PROVIDED.to_string(),
        };
        Ok(text)
    }

    fn text(&self, section: &str, field: &str, format: Format) -> Result<String, RenderError> {
        self.text_or(section, field, format, TO_BE_PROVIDED)
    }
}

fn render_listing(schema: &DocumentSchema, view: &FieldView<'_>) -> String {
    let mut out = format!("# {}\n", schema.title().to_uppercase());
    for section in schema.sections() {
        out.push_str(&format!("\n## {}\n\n", section.title));
        for spec in &section.fields {
            let text = view
                .text(&section.name, &spec.name, Format::Plain)
                .unwrap_or_else(|_| TO_BE_PROVIDED.to_string());
            out.push_str(&format!("**{}:** {}\n\n", spec.name, text));
        }
    }
    if view.mode == RenderMode::Preview {
        out.push_str("---\n\n*Preview: fields marked NEEDS REVIEW require confirmation.*\n");
    }
    out
}

fn render_term_sheet(v: &FieldView<'_>) -> Result<String, RenderError> {
    use Format::*;

    let company = v.text("parties", "company_name", Plain)?;
    let investor = v.text("parties", "lead_investor", Plain)?;
    let round = v.text_or("deal_economics", "round_type", Plain, "Preferred Stock")?;

    let participation_clause = match v.choice("liquidation_terms", "participation_type")?.as_deref() {
        Some("participating") => "The Preferred Stock shall be fully participating. After payment of the \
            Liquidation Preference, remaining proceeds shall be distributed pro rata to holders of Common \
            Stock and Preferred Stock on an as-converted basis."
            .to_string(),
        Some("capped participating") => "The Preferred Stock shall be participating, subject to a cap on \
            total proceeds to be agreed in the definitive agreements."
            .to_string(),
        Some(_) => "The Preferred Stock shall be non-participating. Upon a liquidation event, holders of \
            Preferred Stock shall receive the greater of (i) the Liquidation Preference or (ii) the amount \
            they would receive on conversion to Common Stock."
            .to_string(),
        None => format!(
            "Participation: {}",
            v.text("liquidation_terms", "participation_type", Plain)?
        ),
    };

    let independent_clause = match v.raw("governance", "board_seats_independent")? {
        Some(FieldValue::Number(n)) if *n > 0.0 => format!(
            ", and {} independent director(s) mutually agreed by the Company and the Investors",
            v.text("governance", "board_seats_independent", Plain)?
        ),
        _ => String::new(),
    };

    let observer_clause = match v.choice("governance", "board_observer_rights")?.as_deref() {
        Some("true") => "\n**Board Observer:** The Lead Investor may appoint one non-voting observer \
            to attend all meetings of the Board of Directors.\n"
            .to_string(),
        _ => String::new(),
    };

    let quorum_clause = match v.choice("governance", "investor_consent_for_quorum")?.as_deref() {
        Some("true") => "\n**Quorum:** The presence of the director designated by the Lead Investor \
            shall be required for a quorum of the Board of Directors.\n"
            .to_string(),
        _ => String::new(),
    };

    let pro_rata_clause = match v.choice("governance", "pro_rata_rights")?.as_deref() {
        Some("false") => "The Investors shall not have pro-rata rights in future financings.".to_string(),
        _ => "Each Investor may purchase its pro-rata share of new securities issued by the Company, \
            subject to customary exceptions, based on its fully-diluted ownership."
            .to_string(),
    };

    let drag_along = match v.raw("governance", "drag_along_threshold_pct")? {
        Some(_) => format!(
            "holders of at least {} of the Preferred Stock",
            v.text("governance", "drag_along_threshold_pct", Percent)?
        ),
        None => "holders of a majority of the Preferred Stock".to_string(),
    };

    let acceleration_clause = match v.choice("founder_terms", "acceleration_type")?.as_deref() {
        Some("double-trigger") => "Upon a change of control followed within 12 months by termination \
            without cause or resignation for good reason, 100% of each Founder's unvested shares shall \
            vest (double-trigger acceleration)."
            .to_string(),
        Some("single-trigger") => "Upon a change of control, 100% of each Founder's unvested shares \
            shall vest (single-trigger acceleration)."
            .to_string(),
        Some(_) => "There shall be no acceleration of vesting upon a change of control or termination."
            .to_string(),
        None => format!("Acceleration: {}", v.text("founder_terms", "acceleration_type", Plain)?),
    };

    let effective_date_clause = match v.raw("signatures", "effective_date")? {
        Some(_) => format!(
            "\n**Effective Date:** {}\n",
            v.text("signatures", "effective_date", LongDate)?
        ),
        None => String::new(),
    };

    let mut doc = String::new();
    doc.push_str(&format!(
        "# TERM SHEET\n\n## {} FINANCING\n## {}\n\n",
        round.to_uppercase(),
        company
    ));
    doc.push_str(&format!(
        "This Term Sheet summarizes the principal terms of the proposed investment in {} (the \"Company\"). \
         Except for the sections entitled \"Confidentiality,\" \"Exclusivity\" and \"Expenses,\" it is not a \
         legally binding obligation. Binding obligations arise only under definitive agreements executed by \
         the parties.\n\n---\n\n",
        company
    ));

    doc.push_str("## 1. OFFERING TERMS\n\n");
    doc.push_str(&format!(
        "**Issuer:** {}, a {} corporation (the \"Company\").\n\n",
        company,
        v.text("parties", "company_jurisdiction", Plain)?
    ));
    doc.push_str(&format!(
        "**Founders:** {} (collectively, the \"Founders\").\n\n",
        v.text("parties", "founders", Plain)?
    ));
    doc.push_str(&format!(
        "**Investors:** {} (the \"Lead Investor\") and other investors acceptable to the Company and the \
         Lead Investor (together, the \"Investors\").\n\n",
        investor
    ));
    doc.push_str(&format!(
        "**Amount of Financing:** {} (the \"Investment Amount\").\n\n",
        v.text("deal_economics", "investment_amount", Money)?
    ));
    doc.push_str(&format!(
        "**Pre-Money Valuation:** {} (the \"Pre-Money Valuation\").\n\n",
        v.text("deal_economics", "pre_money_valuation", Money)?
    ));
    doc.push_str(&format!(
        "**Price Per Share:** {} (the \"Original Purchase Price\").\n\n",
        v.text_or("deal_economics", "price_per_share", Price, "TBD")?
    ));
    doc.push_str(&format!(
        "**Type of Security:** {} (the \"Preferred Stock\").\n\n",
        v.text("deal_economics", "security_type", Plain)?
    ));
    doc.push_str(&format!(
        "**Post-Closing Capitalization:** The Investors shall own approximately {} of the Company on a \
         fully-diluted basis.\n\n",
        v.text("deal_economics", "target_ownership_pct", Percent)?
    ));
    doc.push_str(&format!(
        "**Option Pool:** The Company shall reserve {} of its fully-diluted capitalization for its equity \
         incentive plan, calculated on a {} basis.\n\n---\n\n",
        v.text("deal_economics", "option_pool_pct", Percent)?,
        v.text("deal_economics", "option_pool_timing", Plain)?
    ));

    doc.push_str("## 2. RIGHTS AND PREFERENCES OF THE PREFERRED STOCK\n\n");
    doc.push_str(&format!(
        "**Liquidation Preference:** On any liquidation, dissolution, winding up or Deemed Liquidation Event, \
         holders of Preferred Stock shall receive, before any distribution to holders of Common Stock, {} \
         times the Original Purchase Price per share plus declared but unpaid dividends.\n\n",
        v.text("liquidation_terms", "liquidation_preference_multiple", Plain)?
    ));
    doc.push_str(&format!("{}\n\n", participation_clause));
    doc.push_str(&format!(
        "**Dividends:** {} dividends at {} per annum of the Original Purchase Price, payable when, as and if \
         declared by the Board of Directors.\n\n",
        capitalize(&v.text("liquidation_terms", "dividend_type", Plain)?),
        v.text("liquidation_terms", "dividend_rate_pct", Percent)?
    ));
    doc.push_str(&format!(
        "**Anti-Dilution Protection:** {} anti-dilution protection, adjusting the conversion price if the \
         Company issues equity below the then-current conversion price.\n\n",
        capitalize(&v.text("liquidation_terms", "anti_dilution_type", Plain)?)
    ));
    doc.push_str(
        "**Conversion:** Each share of Preferred Stock converts into Common Stock at the holder's option, \
         initially one-to-one, subject to adjustment.\n\n---\n\n",
    );

    doc.push_str("## 3. CORPORATE GOVERNANCE\n\n");
    doc.push_str(&format!(
        "**Board of Directors:** {} members: {} designated by the Lead Investor, {} designated by the \
         Founders{}.\n",
        v.text("governance", "board_seats_total", Plain)?,
        v.text("governance", "board_seats_investor", Plain)?,
        v.text("governance", "board_seats_founder", Plain)?,
        independent_clause
    ));
    doc.push_str(&observer_clause);
    doc.push_str(&quorum_clause);
    doc.push_str(&format!("\n**Pro-Rata Rights:** {}\n\n", pro_rata_clause));
    doc.push_str(&format!(
        "**Drag-Along Rights:** A sale of the Company approved by the Board of Directors and {} binds all \
         stockholders to vote for and sell on the same terms.\n\n---\n\n",
        drag_along
    ));

    doc.push_str("## 4. FOUNDER PROVISIONS\n\n");
    doc.push_str(&format!(
        "**Vesting:** Founder shares vest over {} months with a {} month cliff, {} thereafter. Unvested \
         shares may be repurchased at the lower of cost or fair market value on termination.\n\n",
        v.text("founder_terms", "vesting_period_months", Plain)?,
        v.text("founder_terms", "vesting_cliff_months", Plain)?,
        v.text("founder_terms", "vesting_frequency", Plain)?
    ));
    doc.push_str(&format!("**Acceleration:** {}\n\n", acceleration_clause));
    doc.push_str(&format!(
        "**Non-Competition:** During employment and for {} months after.\n\n",
        v.text("founder_terms", "non_compete_months", Plain)?
    ));
    doc.push_str(&format!(
        "**Non-Solicitation:** During employment and for {} months after.\n\n---\n\n",
        v.text("founder_terms", "non_solicit_months", Plain)?
    ));

    doc.push_str("## 5. TRANSACTION TERMS\n\n");
    doc.push_str(&format!(
        "**Exclusivity:** For {} days from signing, the Company and Founders shall not solicit or accept \
         any other offer to purchase equity securities of the Company.\n\n",
        v.text("transaction_terms", "exclusivity_days", Plain)?
    ));
    doc.push_str(&format!(
        "**Expenses:** The Company shall pay the Lead Investor's reasonable legal fees up to {}.\n\n",
        v.text("transaction_terms", "legal_fee_cap", Money)?
    ));
    doc.push_str(&format!(
        "**Expected Closing:** Within {} days of signing.\n\n",
        v.text("transaction_terms", "expected_closing_days", Plain)?
    ));
    doc.push_str(&format!(
        "**Governing Law:** The laws of the State of {}.\n\n",
        v.text("transaction_terms", "governing_law", Plain)?
    ));
    doc.push_str(
        "**Confidentiality:** The terms of this Term Sheet may not be disclosed without the consent of the \
         other parties, except to advisors bound by confidentiality.\n\n---\n\n",
    );

    doc.push_str("## 6. SIGNATURES\n\n");
    doc.push_str(&format!(
        "This Term Sheet is {} except for Confidentiality, Exclusivity and Expenses.\n",
        v.text("signatures", "binding_status", Plain)?
    ));
    doc.push_str(&effective_date_clause);
    for (party, name_field, title_field, entity) in [
        ("COMPANY", "company_signatory_name", "company_signatory_title", &company),
        ("LEAD INVESTOR", "investor_signatory_name", "investor_signatory_title", &investor),
    ] {
        doc.push_str(&format!(
            "\n**{}:**\n\n{}\n\n\n_______________________________\nName: {}\nTitle: {}\nDate: _____________\n",
            party,
            entity,
            v.text_or("signatures", name_field, Plain, SIGNATURE_BLANK)?,
            v.text_or("signatures", title_field, Plain, SIGNATURE_BLANK)?
        ));
    }

    if v.mode == RenderMode::Preview {
        doc.push_str("\n---\n\n*Preview: fields marked NEEDS REVIEW require confirmation before finalizing.*\n");
    }

    Ok(doc)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
