//! Heuristic recovery of title/company pairs from rendered page text.
//!
//! The page text of a listing site is a flat run of lines: headings,
//! filters, salaries, the listing titles and the company under each title.
//! A title is recognised by its vocabulary, and the company is the first
//! plausible line shortly after it. Everything site- or language-specific
//! lives in [`Vocabulary`].

use std::collections::HashSet;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::types::{Observation, Record};

/// Terms and limits that drive the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    /// Text before the first line containing one of these is discarded.
    pub results_markers: Vec<String>,
    /// A title must contain at least one of these.
    pub role_terms: Vec<String>,
    /// A title must contain none of these.
    pub title_excluded: Vec<String>,
    /// A company line must contain none of these.
    pub company_excluded: Vec<String>,
    pub max_line_chars: usize,
    pub title_chars: RangeInclusive<usize>,
    pub company_max_chars: usize,
    /// How many lines after a title may hold its company.
    pub lookahead: usize,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            results_markers: strings(&["найдено"]),
            role_terms: strings(&["engineer", "инженер"]),
            title_excluded: strings(&[
                "найдено",
                "вакансий",
                "по соответствию",
                "сохранить поиск",
                "вакансии на карте",
                "исключить слова",
                "уровень дохода",
                "опыт",
                "войти",
                "регистрация",
                "резюме",
                "отклик",
                "подписаться",
                "показать",
                "фильтр",
                "сортировка",
            ]),
            company_excluded: strings(&[
                // listing-page chrome
                "активных вакансий",
                "сейчас смотрят",
                "актуальные вакансии",
                "все вакансии",
                "вакансии компании",
                "вакансии",
                "вакансия",
                "похожие",
                "результаты",
                "найдено",
                "отклик",
                "показать",
                "сортировка",
                // currency and pay
                "руб",
                "₽",
                "kzt",
                "тенге",
                "₸",
                "выплаты",
                "зарплата",
                "з/п",
                "оклад",
                "доход",
                "на руки",
                "gross",
                "net",
                "в месяц",
                "в неделю",
                "в день",
                "за смену",
                "за проект",
                "два раза в месяц",
                "еженедельно",
                "ежедневно",
                // schedule and location
                "удаленно",
                "удалённо",
                "remote",
                "опыт",
                "график",
                "занятость",
                "формат",
                "проектная работа",
                "стажировка",
                "адрес",
                "метро",
                "город",
                "на карте",
                "сменный",
                "вахта",
                "подработка",
                // relative time
                "сегодня",
                "вчера",
            ]),
            max_line_chars: 120,
            title_chars: 4..=90,
            company_max_chars: 60,
            lookahead: 6,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn contains_any(haystack_lower: &str, terms: &[String]) -> bool {
    terms
        .iter()
        .any(|term| haystack_lower.contains(&term.to_lowercase()))
}

/// Replace NBSPs, collapse whitespace runs and trim.
pub fn normalize_spaces(line: &str) -> String {
    line.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl Vocabulary {
    pub fn is_likely_title(&self, line: &str) -> bool {
        if line.is_empty() {
            return false;
        }
        let lower = line.to_lowercase();
        if contains_any(&lower, &self.title_excluded) || !contains_any(&lower, &self.role_terms) {
            return false;
        }
        self.title_chars.contains(&line.chars().count())
    }

    pub fn is_likely_company(&self, line: &str) -> bool {
        if line.is_empty() || line.chars().count() > self.company_max_chars {
            return false;
        }
        !contains_any(&line.to_lowercase(), &self.company_excluded)
    }

    /// Clean lines from the results section onwards.
    fn result_lines(&self, text: &str) -> Vec<String> {
        let lines: Vec<String> = text
            .replace("\r\n", "\n")
            .split('\n')
            .map(normalize_spaces)
            .collect();

        let start = lines
            .iter()
            .position(|line| contains_any(&line.to_lowercase(), &self.results_markers))
            .unwrap_or(0);

        lines
            .into_iter()
            .skip(start)
            .filter(|line| !line.is_empty() && line.chars().count() <= self.max_line_chars)
            .collect()
    }

    /// Extract at most `want` distinct records, in page order.
    pub fn extract(&self, text: &str, want: usize) -> Vec<Record> {
        let mut found = Vec::with_capacity(want);
        if want == 0 {
            return found;
        }

        let lines = self.result_lines(text);
        let mut seen = HashSet::new();

        for (i, title) in lines.iter().enumerate() {
            if !self.is_likely_title(title) {
                continue;
            }

            let company = lines
                .iter()
                .skip(i + 1)
                .take(self.lookahead)
                .find(|line| self.is_likely_company(line));
            let Some(company) = company else {
                continue;
            };

            let key = format!("{}|{}", title.to_lowercase(), company.to_lowercase());
            if !seen.insert(key) {
                continue;
            }

            found.push(Record::new(title.clone(), company.clone()));
            if found.len() >= want {
                break;
            }
        }

        found
    }
}

/// Decides whether an observation is worth running the extractor on, plus
/// the optional fallback for pages that report no results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsTrigger {
    /// All of these must appear in the URL (case-insensitive).
    pub url_contains: Vec<String>,
    /// When non-empty, the visible text must contain one of these.
    pub text_contains: Vec<String>,
    pub no_results_markers: Vec<String>,
    pub fallback_url: Option<String>,
}

impl ResultsTrigger {
    /// Profile for a job-board search results page.
    pub fn job_search() -> Self {
        Self {
            url_contains: strings(&["text="]),
            text_contains: Vec::new(),
            no_results_markers: strings(&["ничего не найдено", "не найдено"]),
            fallback_url: None,
        }
    }

    pub fn is_results_page(&self, observation: &Observation) -> bool {
        if self.url_contains.is_empty() && self.text_contains.is_empty() {
            return false;
        }
        let url = observation.url().to_lowercase();
        let url_ok = self
            .url_contains
            .iter()
            .all(|part| url.contains(&part.to_lowercase()));
        let text_ok = self.text_contains.is_empty()
            || contains_any(&observation.visible_text().to_lowercase(), &self.text_contains);
        url_ok && text_ok
    }

    /// The URL to retry with, when the page says nothing was found.
    pub fn fallback_for(&self, observation: &Observation) -> Option<&str> {
        let url = self.fallback_url.as_deref()?;
        let text = observation.visible_text().to_lowercase();
        contains_any(&text, &self.no_results_markers).then_some(url)
    }
}

/// Everything the loop needs to know about harvesting results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionProfile {
    pub vocabulary: Vocabulary,
    pub trigger: ResultsTrigger,
}

impl Default for ExtractionProfile {
    fn default() -> Self {
        Self {
            vocabulary: Vocabulary::default(),
            trigger: ResultsTrigger::job_search(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    const SAMPLE: &str = "Найдено 5\nAI Engineer\nAcme Inc\nнерелевантная строка\nData Engineer\nBeta LLC";

    #[test]
    fn pairs_come_out_in_page_order() {
        let vocab = Vocabulary::default();
        assert_eq!(
            vocab.extract(SAMPLE, 2),
            vec![
                Record::new("AI Engineer", "Acme Inc"),
                Record::new("Data Engineer", "Beta LLC"),
            ]
        );
        assert_eq!(vocab.extract(SAMPLE, 1), vec![Record::new("AI Engineer", "Acme Inc")]);
        assert!(vocab.extract(SAMPLE, 0).is_empty());
    }

    #[test]
    fn repeated_pairs_are_deduplicated() {
        let text = format!("{SAMPLE}\nai engineer\nACME INC\nAI Engineer\nAcme Inc");
        let found = Vocabulary::default().extract(&text, 10);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn header_noise_before_marker_is_skipped() {
        let text = "Senior Engineer\nMenu Co\nНайдено 120 вакансий\nML Engineer\nGamma";
        assert_eq!(
            Vocabulary::default().extract(text, 5),
            vec![Record::new("ML Engineer", "Gamma")]
        );
    }

    #[test]
    fn salary_and_schedule_lines_are_not_companies() {
        let text = "Найдено 3\r\nBackend Engineer\r\nот 200 000 ₽ на руки\r\nУдаленно\r\nОпыт 1-3 года\r\nDelta\u{a0}\u{a0}Soft";
        assert_eq!(
            Vocabulary::default().extract(text, 3),
            vec![Record::new("Backend Engineer", "Delta Soft")]
        );
    }

    #[test]
    fn company_outside_lookahead_drops_title() {
        let mut text = String::from("Найдено\nQA Engineer\n");
        for _ in 0..6 {
            text.push_str("Вчера\n");
        }
        text.push_str("Far Away Ltd\n");
        assert!(Vocabulary::default().extract(&text, 3).is_empty());
    }

    #[test]
    fn long_lines_and_navigation_titles_are_ignored() {
        let prose = format!("Engineer {}", "x".repeat(200));
        let text = format!("Найдено\n{prose}\nAcme\nВойти как engineer\nAcme\nКупить");
        assert!(Vocabulary::default().extract(&text, 3).is_empty());
    }

    #[test]
    fn custom_vocabulary_replaces_defaults() {
        let vocab: Vocabulary = serde_json::from_value(json!({
            "results_markers": ["results"],
            "role_terms": ["chef"],
            "company_excluded": ["$"],
            "lookahead": 2
        }))
        .unwrap();
        let text = "Head Chef\nRestaurant A\nResults\nSous Chef\n$20/h\nBistro B\nPastry chef\nBistro B";
        assert_eq!(
            vocab.extract(text, 5),
            vec![
                Record::new("Sous Chef", "Bistro B"),
                Record::new("Pastry chef", "Bistro B"),
            ]
        );
    }

    fn obs(url: &str, text: &str) -> Observation {
        let mut map = Map::new();
        map.insert("url".into(), json!(url));
        map.insert("visible_text".into(), json!(text));
        Observation(map)
    }

    #[test]
    fn trigger_matches_search_urls_only() {
        let trigger = ResultsTrigger::job_search();
        assert!(trigger.is_results_page(&obs("https://hh.ru/search/vacancy?TEXT=AI", "")));
        assert!(!trigger.is_results_page(&obs("https://hh.ru/", "")));
        assert!(!ResultsTrigger::default().is_results_page(&obs("https://x?text=1", "")));
    }

    #[test]
    fn fallback_needs_marker_and_url() {
        let mut trigger = ResultsTrigger::job_search();
        let empty = obs("https://hh.ru/search?text=zz", "По запросу ничего не найдено");
        assert_eq!(trigger.fallback_for(&empty), None);

        trigger.fallback_url = Some("https://hh.ru/search/vacancy?text=AI&area=1".into());
        assert_eq!(
            trigger.fallback_for(&empty),
            Some("https://hh.ru/search/vacancy?text=AI&area=1")
        );
        assert_eq!(trigger.fallback_for(&obs("https://hh.ru", SAMPLE)), None);
    }
}
