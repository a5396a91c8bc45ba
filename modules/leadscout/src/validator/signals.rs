//! Rule-based evidence that a page belongs to a business.

use std::sync::LazyLock;

use regex::Regex;

use leadscout_common::extract_domain;

static RE_PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)tel:|\+55\s?\(?\d{2}\)?|\(\d{2}\)\s?9?\d{4}[-.\s]?\d{4}").unwrap()
});
static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)mailto:|[a-z0-9._%+-]+@[a-z0-9-]+(?:\.[a-z0-9-]+)*\.(?:com|br|net|org)\b").unwrap()
});
static RE_CONTACT_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)fale conosco|entre em contato|formulário de contato|<form[^>]*contat").unwrap()
});
static RE_SERVICES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)nossos serviços|serviços|tratamentos|especialidades|agende|agendamento|orçamento")
        .unwrap()
});
static RE_PRICING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)r\$\s?\d|tabela de preços|\bpreços?\b|\bplanos\b|\bpromoção\b").unwrap()
});
static RE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:rua|av\.|avenida|travessa|alameda)\s+\w|\bcep:?\s?\d{5}-?\d{3}|google\.com/maps|maps\.google|<iframe[^>]*maps",
    )
    .unwrap()
});
static RE_WHATSAPP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)wa\.me/|api\.whatsapp\.com|whatsapp").unwrap());
static RE_LISTICLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:os|as)\s+\d+\s+melhores\b|\btop\s+\d+\b").unwrap());

const SOCIAL_DOMAINS: &[&str] = &[
    "instagram.com",
    "facebook.com",
    "fb.com",
    "tiktok.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "pinterest.com",
    "threads.net",
    "youtube.com",
];

const DIRECTORY_DOMAINS: &[&str] = &[
    "guiamais.com.br",
    "apontador.com.br",
    "telelistas.net",
    "doctoralia.com.br",
    "yelp.com",
    "tripadvisor.com.br",
    "tripadvisor.com",
    "cylex.com.br",
    "econodata.com.br",
    "cnpj.biz",
    "solutudo.com.br",
    "encontrafortaleza.com",
    "reclameaqui.com.br",
];

const NEWS_DOMAINS: &[&str] = &[
    "globo.com",
    "diariodonordeste.verdesmares.com.br",
    "opovo.com.br",
    "tribunadoceara.com.br",
    "uol.com.br",
    "folha.uol.com.br",
    "metropoles.com",
    "cnnbrasil.com.br",
];

const MARKETPLACE_DOMAINS: &[&str] = &[
    "mercadolivre.com.br",
    "olx.com.br",
    "amazon.com.br",
    "shopee.com.br",
    "magazineluiza.com.br",
    "americanas.com.br",
    "ifood.com.br",
    "elo7.com.br",
];

/// Positive and negative signal names found for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalReport {
    pub positive: Vec<&'static str>,
    pub negative: Vec<&'static str>,
}

impl SignalReport {
    /// `positives - 2 * negatives`
    pub fn score(&self) -> i32 {
        self.positive.len() as i32 - 2 * self.negative.len() as i32
    }

    /// `+name` / `-name` labels in detection order.
    pub fn labels(&self) -> Vec<String> {
        self.positive
            .iter()
            .map(|s| format!("+{s}"))
            .chain(self.negative.iter().map(|s| format!("-{s}")))
            .collect()
    }
}

fn host_matches(host: &str, domains: &[&str]) -> bool {
    let host = host.strip_prefix("www.").unwrap_or(host);
    domains
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

/// Scan `url`, `title` and page `content` for signals. Pure and deterministic.
pub fn detect(url: &str, title: &str, content: &str) -> SignalReport {
    let mut report = SignalReport::default();

    let positives: [(&'static str, &LazyLock<Regex>); 7] = [
        ("phone", &RE_PHONE),
        ("email", &RE_EMAIL),
        ("contact_form", &RE_CONTACT_FORM),
        ("services", &RE_SERVICES),
        ("pricing", &RE_PRICING),
        ("address", &RE_ADDRESS),
        ("whatsapp", &RE_WHATSAPP),
    ];
    for (name, re) in positives {
        if re.is_match(content) {
            report.positive.push(name);
        }
    }

    let host = extract_domain(url);
    let path = url.to_lowercase();
    if host_matches(&host, NEWS_DOMAINS) || path.contains("/noticia") {
        report.negative.push("news");
    }
    if host_matches(&host, DIRECTORY_DOMAINS) || RE_LISTICLE.is_match(title) {
        report.negative.push("directory");
    }
    if host_matches(&host, SOCIAL_DOMAINS) {
        report.negative.push("social");
    }
    if host_matches(&host, MARKETPLACE_DOMAINS) {
        report.negative.push("marketplace");
    }

    report
}
