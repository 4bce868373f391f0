//! Synthetic per-run test data
//!
//! Every fixture carries the run token so accounts created on the target
//! can be traced back to the run that made them.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use tempfile::NamedTempFile;

use crate::error::E2eResult;

/// Default password for generated tenant admins
const FIXTURE_PASSWORD: &str = "Chorus!Test2024";

/// Short lowercase token identifying one run
pub fn run_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

const AREA_CODES: [u16; 5] = [206, 312, 415, 512, 617];

/// Exchanges 200-999 times 10,000 line numbers
const NUMBERS_PER_AREA: u64 = 800 * 10_000;

static PHONE_START: OnceLock<u64> = OnceLock::new();
static PHONE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A North American E.164 number. Numbers never repeat within a process;
/// the random starting point keeps concurrent runs apart.
pub fn fixture_phone() -> String {
    let start = *PHONE_START.get_or_init(|| rand::thread_rng().gen_range(0..NUMBERS_PER_AREA * AREA_CODES.len() as u64));
    let n = (start + PHONE_SEQ.fetch_add(1, Ordering::Relaxed)) % (NUMBERS_PER_AREA * AREA_CODES.len() as u64);
    phone_number(n)
}

fn phone_number(n: u64) -> String {
    let area = AREA_CODES[(n / NUMBERS_PER_AREA) as usize % AREA_CODES.len()];
    let local = n % NUMBERS_PER_AREA;
    format!("+1{}{}{:04}", area, 200 + local / 10_000, local % 10_000)
}

fn suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..6].to_string()
}

/// Registration data for a fresh church account
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantFixture {
    pub church_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub phone: String,
}

impl TenantFixture {
    pub fn generate(run_token: &str, email_domain: &str) -> Self {
        let id = suffix();
        Self {
            church_name: format!("Chorus Test Church {run_token}-{id}"),
            first_name: "Chorus".to_string(),
            last_name: format!("Admin{id}"),
            email: format!("chorus+{run_token}-{id}@{email_domain}"),
            password: FIXTURE_PASSWORD.to_string(),
            phone: fixture_phone(),
        }
    }

    /// Body for `POST /auth/register`
    pub fn register_body(&self) -> Value {
        json!({
            "churchName": self.church_name,
            "firstName": self.first_name,
            "lastName": self.last_name,
            "email": self.email,
            "password": self.password,
            "phone": self.phone,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberFixture {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
}

impl MemberFixture {
    pub fn generate(run_token: &str, email_domain: &str) -> Self {
        let id = suffix();
        Self {
            first_name: "Member".to_string(),
            last_name: format!("Test{id}"),
            phone: fixture_phone(),
            email: format!("member+{run_token}-{id}@{email_domain}"),
        }
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone = phone.to_string();
        self
    }

    pub fn body(&self) -> Value {
        json!({
            "firstName": self.first_name,
            "lastName": self.last_name,
            "phone": self.phone,
            "email": self.email,
        })
    }
}

/// Member import file, removed from disk when dropped
pub struct MemberCsv {
    file: NamedTempFile,
    members: Vec<MemberFixture>,
}

impl MemberCsv {
    /// Write one row per member. Rows repeating an earlier phone are dropped.
    pub fn write(members: &[MemberFixture]) -> E2eResult<Self> {
        let mut seen = HashSet::new();
        let members: Vec<MemberFixture> = members
            .iter()
            .filter(|m| seen.insert(m.phone.clone()))
            .cloned()
            .collect();

        let mut file = tempfile::Builder::new()
            .prefix("chorus-members-")
            .suffix(".csv")
            .tempfile()?;

        writeln!(file, "firstName,lastName,phone,email")?;
        for m in &members {
            writeln!(
                file,
                "{},{},{},{}",
                csv_field(&m.first_name),
                csv_field(&m.last_name),
                csv_field(&m.phone),
                csv_field(&m.email)
            )?;
        }
        file.flush()?;

        Ok(Self { file, members })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn rows(&self) -> usize {
        self.members.len()
    }

    /// Members actually written, in file order
    pub fn members(&self) -> &[MemberFixture] {
        &self.members
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_token_is_short_lowercase() {
        let token = run_token();
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn phones_are_e164() {
        for _ in 0..50 {
            let phone = fixture_phone();
            assert!(phone.starts_with("+1"), "{phone}");
            assert_eq!(phone.len(), 12, "{phone}");
            assert!(phone[1..].chars().all(|c| c.is_ascii_digit()), "{phone}");
            assert!(phone.as_bytes()[5] >= b'2', "{phone}");
        }
    }

    #[test]
    fn phones_do_not_repeat() {
        let phones: HashSet<String> = (0..20_000).map(|_| fixture_phone()).collect();
        assert_eq!(phones.len(), 20_000);
    }

    #[test]
    fn phone_sequence_wraps_across_area_codes() {
        assert_eq!(phone_number(0), "+12062000000");
        assert_eq!(phone_number(NUMBERS_PER_AREA - 1), "+12069999999");
        assert_eq!(phone_number(NUMBERS_PER_AREA), "+13122000000");
        assert_eq!(phone_number(NUMBERS_PER_AREA * 5), "+12062000000");
    }

    #[test]
    fn csv_drops_repeated_phones() {
        let first = MemberFixture::generate("t", "example.com").with_phone("+12065550100");
        let dup = MemberFixture::generate("t", "example.com").with_phone("+12065550100");
        let other = MemberFixture::generate("t", "example.com");
        let csv = MemberCsv::write(&[first.clone(), dup, other]).unwrap();

        assert_eq!(csv.rows(), 2);
        assert_eq!(csv.members()[0].email, first.email);
        let content = std::fs::read_to_string(csv.path()).unwrap();
        assert_eq!(content.matches("+12065550100").count(), 1);
    }

    #[test]
    fn tenant_emails_are_unique_within_a_run() {
        let a = TenantFixture::generate("abc12345", "example.com");
        let b = TenantFixture::generate("abc12345", "example.com");
        assert_ne!(a.email, b.email);
        assert!(a.email.starts_with("chorus+abc12345-"));
        assert!(a.email.ends_with("@example.com"));
        assert_eq!(a.register_body()["churchName"], a.church_name.as_str());
    }

    #[test]
    fn csv_quotes_awkward_fields() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("Smith, Jr."), "\"Smith, Jr.\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn csv_file_is_removed_on_drop() {
        let members = vec![
            MemberFixture::generate("t", "example.com"),
            MemberFixture::generate("t", "example.com").with_phone("+12065550100"),
        ];
        let csv = MemberCsv::write(&members).unwrap();
        let path = csv.path().to_path_buf();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.contains("+12065550100"));
        assert_eq!(csv.rows(), 2);

        drop(csv);
        assert!(!path.exists());
    }
}
