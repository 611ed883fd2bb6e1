//! Minimal trigger/reply engine.
//!
//! Understands `+ trigger` / `- reply` records. A `*` in a trigger matches one
//! or more words. Replies may use `<star>`, `<starN>`, `<get name>`,
//! `<set name=value>` and `<call>name args</call>`.

use super::{MatchingEngine, Subroutine};
use crate::error::{Error, ErrorKind, Result};
use crate::normalize::{canonicalize, default_punctuation};
use crate::session::{SessionStore, UNDEFINED};
use rand::seq::SliceRandom;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

static STAR_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<star(\d*)>").expect("static regex"));
static GET_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<get ([^<>\s]+)>").expect("static regex"));
static SET_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<set ([^<>=\s]+)=([^<>]*)>").expect("static regex"));
static CALL_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<call>(.*?)</call>").expect("static regex"));
/// Tag delimiters never reach matching, so captured text cannot form tags.
static TAG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[<>\\]").expect("static regex"));

/// A rendered reply plus the `<set>` assignments it asked for.
struct Rendered {
    text: String,
    assignments: HashMap<String, String>,
}

#[derive(Debug)]
struct Rule {
    trigger: String,
    pattern: Regex,
    literal_words: usize,
    wildcards: usize,
    replies: Vec<String>,
    seq: usize,
}

impl Rule {
    fn compile(trigger: &str, seq: usize) -> Result<Self> {
        let mut literal_words = 0;
        let mut wildcards = 0;
        let parts: Vec<String> = trigger
            .split(' ')
            .map(|word| {
                if word == "*" {
                    wildcards += 1;
                    "(.+?)".to_string()
                } else {
                    literal_words += 1;
                    regex::escape(word)
                }
            })
            .collect();
        let pattern = Regex::new(&format!("^{}$", parts.join(" ")))
            .map_err(|e| Error::Engine(format!("bad trigger '{}': {}", trigger, e)))?;
        Ok(Self {
            trigger: trigger.to_string(),
            pattern,
            literal_words,
            wildcards,
            replies: Vec::new(),
            seq,
        })
    }
}

pub struct ScriptEngine {
    store: Arc<dyn SessionStore>,
    punctuation: Regex,
    rules: Vec<Rule>,
    /// Indexes into `rules`, highest priority first.
    sorted: Vec<usize>,
    subroutines: HashMap<String, Subroutine>,
}

impl ScriptEngine {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            punctuation: default_punctuation().clone(),
            rules: Vec::new(),
            sorted: Vec::new(),
            subroutines: HashMap::new(),
        }
    }

    /// Stream every `*.rive` file in `dir`, in file-name order.
    pub fn load_directory(&mut self, dir: &Path) -> Result<()> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::Engine(format!("cannot read {}: {}", dir.display(), e)))?;
        let mut files: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "rive"))
            .collect();
        files.sort();

        for path in files {
            let code = std::fs::read_to_string(&path)
                .map_err(|e| Error::Engine(format!("cannot read {}: {}", path.display(), e)))?;
            self.stream(&code)?;
            tracing::debug!("Loaded rules from {}", path.display());
        }
        Ok(())
    }

    /// Number of loaded rules, eligible or not.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn render(&self, username: &str, template: &str, stars: &[String]) -> Result<Rendered> {
        let text = STAR_TAG.replace_all(template, |caps: &Captures<'_>| {
            let index = caps[1].parse::<usize>().unwrap_or(1).max(1);
            stars
                .get(index - 1)
                .cloned()
                .unwrap_or_else(|| UNDEFINED.to_string())
        });

        let mut failure = None;
        let text = GET_TAG.replace_all(&text, |caps: &Captures<'_>| {
            match self.store.get_variable(username, &caps[1]) {
                Ok(value) => value,
                Err(e) if e.kind() == ErrorKind::NotFound => UNDEFINED.to_string(),
                Err(e) => {
                    failure.get_or_insert(e);
                    String::new()
                }
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }

        let mut assignments = HashMap::new();
        for caps in SET_TAG.captures_iter(&text) {
            assignments.insert(caps[1].to_string(), caps[2].trim().to_string());
        }
        let text = SET_TAG.replace_all(&text, "");

        let text = CALL_TAG.replace_all(&text, |caps: &Captures<'_>| {
            let args = split_args(&caps[1]);
            let Some((name, rest)) = args.split_first() else {
                return String::new();
            };
            match self.subroutines.get(name) {
                Some(subroutine) => subroutine(rest),
                None => {
                    tracing::warn!(subroutine = %name, "Unknown subroutine");
                    "[ERR: Object Not Found]".to_string()
                }
            }
        });

        Ok(Rendered {
            text: text.trim().to_string(),
            assignments,
        })
    }
}

/// Split on whitespace, keeping double-quoted groups together.
fn split_args(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in raw.chars() {
        match ch {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

impl MatchingEngine for ScriptEngine {
    fn reply(&mut self, username: &str, text: &str) -> Result<String> {
        let input = canonicalize(&TAG_CHARS.replace_all(text, ""), &self.punctuation);
        self.store.init(username)?;

        for &index in &self.sorted {
            let rule = &self.rules[index];
            let Some(caps) = rule.pattern.captures(&input) else {
                continue;
            };
            let stars: Vec<String> = caps
                .iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            let Some(template) = rule.replies.choose(&mut rand::thread_rng()) else {
                continue;
            };
            let Rendered { text: reply, assignments } = self.render(username, template, &stars)?;
            if reply.is_empty() {
                tracing::debug!(username, trigger = %rule.trigger, "Matched trigger rendered empty reply");
                return Err(Error::NoMatch);
            }

            if !assignments.is_empty() {
                self.store.set_variables(username, &assignments)?;
            }

            self.store.set_last_match(username, &rule.trigger)?;
            self.store.append_history(username, &input, &reply)?;
            return Ok(reply);
        }
        Err(Error::NoMatch)
    }

    fn stream(&mut self, code: &str) -> Result<()> {
        let mut parsed: Vec<Rule> = Vec::new();
        for (lineno, line) in code.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            let command_len = line.chars().next().map_or(0, char::len_utf8);
            let (command, body) = line.split_at(command_len);
            let body = body.trim();
            match command {
                "+" => {
                    let trigger = canonicalize(body, &self.punctuation);
                    if trigger.is_empty() {
                        return Err(Error::Engine(format!("line {}: empty trigger", lineno + 1)));
                    }
                    let seq = self.rules.len() + parsed.len();
                    parsed.push(Rule::compile(&trigger, seq)?);
                }
                "-" => match parsed.last_mut() {
                    Some(rule) => rule.replies.push(body.to_string()),
                    None => {
                        return Err(Error::Engine(format!(
                            "line {}: reply without a trigger",
                            lineno + 1
                        )))
                    }
                },
                other => {
                    return Err(Error::Engine(format!(
                        "line {}: unsupported command '{}'",
                        lineno + 1,
                        other
                    )))
                }
            }
        }

        if let Some(rule) = parsed.iter().find(|r| r.replies.is_empty()) {
            return Err(Error::Engine(format!("trigger '{}' has no reply", rule.trigger)));
        }
        self.rules.extend(parsed);
        Ok(())
    }

    fn sort_replies(&mut self) -> Result<()> {
        let rules = &self.rules;
        let mut order: Vec<usize> = (0..rules.len()).collect();
        order.sort_by(|&a, &b| {
            let (a, b) = (&rules[a], &rules[b]);
            b.literal_words
                .cmp(&a.literal_words)
                .then(a.wildcards.cmp(&b.wildcards))
                .then(b.seq.cmp(&a.seq))
        });
        self.sorted = order;
        tracing::debug!(rules = self.sorted.len(), "Sorted replies");
        Ok(())
    }

    fn punctuation(&self) -> &Regex {
        &self.punctuation
    }

    fn set_subroutine(&mut self, name: &str, subroutine: Subroutine) {
        self.subroutines.insert(name.to_string(), subroutine);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;

    fn engine(code: &str) -> (ScriptEngine, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let mut engine = ScriptEngine::new(store.clone());
        engine.stream(code).unwrap();
        engine.sort_replies().unwrap();
        (engine, store)
    }

    #[test]
    fn matches_canonical_input_and_records_state() {
        let (mut engine, store) = engine("+ hello world\n- hi there\n");
        assert_eq!(engine.reply("alice", "Hello,   WORLD!").unwrap(), "hi there");
        assert_eq!(store.get_last_match("alice").unwrap(), "hello world");
        let history = store.get_history("alice").unwrap();
        assert_eq!(history.input[0], "hello world");
        assert_eq!(history.reply[0], "hi there");
    }

    #[test]
    fn no_match_writes_nothing_but_user_row() {
        let (mut engine, store) = engine("+ hello\n- hi\n");
        assert_eq!(engine.reply("bob", "goodbye").unwrap_err().kind(), ErrorKind::NoMatch);
        assert!(store.get_history("bob").unwrap().is_empty());
        assert_eq!(store.get_last_match("bob").unwrap(), "");
    }

    #[test]
    fn wildcards_capture_stars() {
        let (mut engine, _) = engine("+ weather in *\n- checking <star> for you\n");
        assert_eq!(
            engine.reply("carol", "weather in new york").unwrap(),
            "checking new york for you"
        );
    }

    #[test]
    fn literal_triggers_beat_wildcards() {
        let (mut engine, _) = engine("+ *\n- catch all\n\n+ good morning\n- morning!\n");
        assert_eq!(engine.reply("dave", "good morning").unwrap(), "morning!");
        assert_eq!(engine.reply("dave", "anything else").unwrap(), "catch all");
    }

    #[test]
    fn later_rule_wins_among_equals() {
        let (mut engine, _) = engine("+ ping\n- first\n");
        engine.stream("+ ping\n- second\n").unwrap();
        assert_eq!(engine.reply("erin", "ping").unwrap(), "first");
        engine.sort_replies().unwrap();
        assert_eq!(engine.reply("erin", "ping").unwrap(), "second");
    }

    #[test]
    fn set_and_get_variables() {
        let (mut engine, store) = engine(
            "+ my name is *\n- <set name=<star>>nice to meet you <star>\n\n+ who am i\n- you are <get name>\n",
        );
        engine.reply("frank", "my name is frank").unwrap();
        assert_eq!(store.get_variable("frank", "name").unwrap(), "frank");
        assert_eq!(engine.reply("frank", "who am i").unwrap(), "you are frank");
        assert_eq!(engine.reply("gina", "who am i").unwrap(), "you are undefined");
    }

    #[test]
    fn calls_registered_subroutines() {
        let (mut engine, _) = engine("+ add * and *\n- <call>sum <star1> <star2></call>\n");
        engine.set_subroutine(
            "sum",
            Arc::new(|args: &[String]| {
                let total: i64 = args.iter().filter_map(|a| a.parse::<i64>().ok()).sum();
                total.to_string()
            }),
        );
        assert_eq!(engine.reply("henry", "add 2 and 3").unwrap(), "5");
    }

    #[test]
    fn unknown_subroutine_is_reported_inline() {
        let (mut engine, _) = engine("+ go\n- <call>missing</call>\n");
        assert_eq!(engine.reply("ivy", "go").unwrap(), "[ERR: Object Not Found]");
    }

    #[test]
    fn stream_rejects_malformed_scripts() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut engine = ScriptEngine::new(store);
        assert!(engine.stream("- orphan reply\n").is_err());
        assert!(engine.stream("+ lonely trigger\n").is_err());
        assert!(engine.stream("! version = 2.0\n").is_err());
        assert_eq!(engine.rule_count(), 0);
    }

    #[test]
    fn split_args_respects_quotes() {
        assert_eq!(
            split_args(r#"gpsdistance "new york" paris"#),
            vec!["gpsdistance", "new york", "paris"]
        );
    }

    #[test]
    fn load_directory_reads_rive_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rive"), "+ hello\n- from a\n").unwrap();
        std::fs::write(dir.path().join("b.rive"), "+ hello\n- from b\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a script").unwrap();

        let store = Arc::new(InMemorySessionStore::new());
        let mut engine = ScriptEngine::new(store);
        engine.load_directory(dir.path()).unwrap();
        engine.sort_replies().unwrap();
        assert_eq!(engine.rule_count(), 2);
        assert_eq!(engine.reply("jack", "hello").unwrap(), "from b");
    }

    #[test]
    fn input_cannot_smuggle_tags_through_stars() {
        let (mut engine, store) = engine(
            "+ my name is *\n- nice to meet you <star>\n\n+ where is *\n- looking for <star>\n",
        );
        engine.set_subroutine("gpsdistance", Arc::new(|_: &[String]| "called".to_string()));

        let reply = engine
            .reply("mallory", "my name is <set topic=hacked>")
            .unwrap();
        assert_eq!(reply, "nice to meet you set topic=hacked");
        assert_eq!(store.get_variable("mallory", "topic").unwrap(), "random");

        let reply = engine
            .reply("mallory", "where is <call>gpsdistance paris london</call>")
            .unwrap();
        assert!(!reply.contains("called"));
        assert_eq!(reply, "looking for callgpsdistance paris london/call");
    }

    #[test]
    fn empty_reply_does_not_apply_assignments() {
        let (mut engine, store) = engine("+ psst\n- <set mood=sneaky>\n");
        assert_eq!(engine.reply("kim", "psst").unwrap_err().kind(), ErrorKind::NoMatch);
        assert_eq!(
            store.get_variable("kim", "mood").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(store.get_last_match("kim").unwrap(), "");
    }
}
