//! Offline responder used when every remote tier has failed.
//!
//! No network and no model: key phrases are runs of non-stopword words,
//! and the small-talk intents are keyword matches.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]+(?:'[A-Za-z]+)*|[0-9]+(?:\.[0-9]+)?|[^\sA-Za-z0-9]").expect("valid token pattern"));

const MAX_PHRASE_WORDS: usize = 3;
const MAX_PHRASES: usize = 5;

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "best", "between", "both", "but", "by", "can", "could",
    "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from", "further", "get",
    "give", "good", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how",
    "i", "i'm", "if", "in", "into", "is", "it", "it's", "its", "just", "know", "like", "lot", "lots",
    "me", "more", "most", "much", "my", "need", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "out", "over", "own", "please", "quite", "really", "same",
    "she", "should", "so", "some", "such", "tell", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "through", "to", "too", "under", "until", "up", "very",
    "want", "was", "we", "well", "were", "what", "when", "where", "which", "while", "who", "whom",
    "why", "will", "with", "would", "you", "your", "yours",
];

const GREETING_WORDS: &[&str] = &["hello", "hi", "hey", "greetings", "namaste", "hiya", "howdy"];
const THANKS_WORDS: &[&str] = &["thank", "thanks", "thx", "appreciate", "appreciated"];
const GOODBYE_WORDS: &[&str] = &["bye", "goodbye", "farewell", "later", "cya"];
const CROP_WORDS: &[&str] = &[
    "crop", "crops", "soil", "plant", "planting", "grow", "growing", "farm", "farming", "field",
    "land", "seed", "seeds", "nitrogen", "phosphorus", "potassium", "rain", "rainfall", "ph",
    "fertilizer", "harvest", "yield", "irrigation", "humidity", "temperature", "climate",
];

const TOPICS: &str = "You can ask me about:\n\
                      - Best crops for your farm\n\
                      - Soil nutrients and what they mean\n\
                      - Or just say hello!";

/// Small-talk intents recognised offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Thanks,
    Goodbye,
    CropQuery,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct LocalResponder {
    stopwords: HashSet<&'static str>,
}

impl Default for LocalResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalResponder {
    pub fn new() -> Self {
        Self {
            stopwords: STOPWORDS.iter().copied().collect(),
        }
    }

    fn words(utterance: &str) -> Vec<String> {
        TOKEN
            .find_iter(utterance)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }

    pub fn detect_intent(&self, utterance: &str) -> Intent {
        let words = Self::words(utterance);
        let has = |set: &[&str]| words.iter().any(|w| set.contains(&w.as_str()));

        if has(CROP_WORDS) {
            Intent::CropQuery
        } else if has(THANKS_WORDS) {
            Intent::Thanks
        } else if has(GOODBYE_WORDS) || utterance.to_lowercase().contains("see you") {
            Intent::Goodbye
        } else if has(GREETING_WORDS) || utterance.to_lowercase().starts_with("good morning") {
            Intent::Greeting
        } else {
            Intent::Unknown
        }
    }

    /// Lower-cased key phrases in order of first appearance.
    ///
    /// A phrase is a run of up to three alphabetic non-stopwords; numbers,
    /// punctuation and stopwords end a run.
    pub fn noun_phrases(&self, utterance: &str) -> Vec<String> {
        let mut phrases: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();

        let flush = |current: &mut Vec<String>, phrases: &mut Vec<String>| {
            if !current.is_empty() {
                let phrase = current.join(" ");
                if !phrases.contains(&phrase) {
                    phrases.push(phrase);
                }
                current.clear();
            }
        };

        for token in Self::words(utterance) {
            let is_word = token.chars().all(|c| c.is_ascii_alphabetic() || c == '\'');
            if is_word && token.len() > 1 && !self.stopwords.contains(token.as_str()) {
                if current.len() == MAX_PHRASE_WORDS {
                    flush(&mut current, &mut phrases);
                }
                current.push(token);
            } else {
                flush(&mut current, &mut phrases);
            }
        }
        flush(&mut current, &mut phrases);

        phrases.truncate(MAX_PHRASES);
        phrases
    }

    /// Templated reply; never empty and never touches the network.
    pub fn respond_offline(&self, utterance: &str) -> String {
        match self.detect_intent(utterance) {
            Intent::Greeting => format!(
                "Hello! 🌱 My online assistants are unreachable right now, but I'm still here.\n{}",
                TOPICS
            ),
            Intent::Thanks => "You're welcome! 🌾 Come back any time you need crop advice.".to_string(),
            Intent::Goodbye => "Goodbye, and good luck with your harvest! 🌾".to_string(),
            Intent::CropQuery | Intent::Unknown => {
                let phrases = self.noun_phrases(utterance);
                let heard = if phrases.is_empty() {
                    "I couldn't reach my advisory services to answer that right now.".to_string()
                } else {
                    format!(
                        "I couldn't reach my advisory services right now, but I noted what you asked about: {}.",
                        phrases.join(", ")
                    )
                };
                format!("{}\n{}", heard, TOPICS)
            }
        }
    }
}
