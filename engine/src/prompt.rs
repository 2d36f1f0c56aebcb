//! Prompt builders for the three round kinds.
//!
//! Each builder returns the full user-turn text; the chat template and the
//! reasoning seed are applied by the round runner. Known facts ride along
//! in compacted form where one exists, which is what keeps the context
//! affordable once the database has a few hundred entries.

use std::fmt::Write;

const KNOWN_FACTS_OPEN: &str = "<KnownFacts>";
const KNOWN_FACTS_CLOSE: &str = "</KnownFacts>";
const PENDING_FACTS_OPEN: &str = "<PendingFacts>";
const PENDING_FACTS_CLOSE: &str = "</PendingFacts>";

const GENERATION_GUIDANCE: &str = "Examples of what NOT to write:
Too broad: Compilers perform many optimization passes.
Not a statement: Exploring cache-friendly data layouts for games.
Common knowledge: Binary search requires a sorted input.

Examples of good lines:
The Boyer-Moore majority vote algorithm finds a majority element in one pass with constant memory.
SQLite in WAL mode lets a single writer proceed while readers keep reading.

Instructions:
List very specific, lesser-known facts within the user's interests, each one a single plain statement. Skip anything related to the dislikes, and anything close to a fact inside the KnownFacts tags, including facts about the same technique, algorithm, or event. Prefer concrete techniques, numbers, and real-world uses over broad observations; every line should be something the user can search for and learn more about. Write one fact per line with no titles, no numbering, and no **bold**. Provide 30 lines; they do not have to cover every interest. Check privately that each line is a standalone statement and not a repeat. Think as much as you need first, as long as all thinking stays between <think> and </think>.
";

const EVALUATION_GUIDANCE: &str = "Example of an acceptable line: Quadtree partitioning cuts 2D collision checks from quadratic to roughly n log n.

Instructions:
Every line between the PendingFacts tags is a candidate fact. Keep a candidate only when it is specific, relevant to the user, clear of the dislikes, and not close to any known fact above or to another candidate; drop near-duplicates about the same technique or event. Repeat each kept candidate verbatim, exactly one line per fact, with no acknowledgment, no numbering, and no closing remarks; a program reads your output line by line. When a candidate is only a topic carrying no real information, replace it with one concrete detail of that topic written as a statement. If nothing qualifies, write nothing at all. Think as much as you need first, as long as all thinking stays between <think> and </think>.
";

const COMPACTION_GUIDANCE: &str = "Instructions:
The lines between the KnownFacts tags are facts, one per line. For each, write a shortened form of just 2-5 words that keeps what the fact is about; the short forms are compared against future output to avoid repeats. Write the shortened forms one per line, in the same order as the input, with nothing before, between, or after them.
";

/// User turn asking for a batch of fresh facts.
///
/// `known` is the dedupe context: compacted known facts plus the verbatim
/// text of anything still pending, so generating ahead cannot re-produce a
/// fact that is merely waiting to be served.
#[must_use]
pub fn generation_prompt(interests: &[String], dislikes: &[String], known: &[String]) -> String {
    let mut prompt = String::new();
    push_block(&mut prompt, "User's interests:", interests);
    push_block(&mut prompt, "User's dislikes:", dislikes);
    push_tagged(&mut prompt, KNOWN_FACTS_OPEN, KNOWN_FACTS_CLOSE, known);
    prompt.push_str(GENERATION_GUIDANCE);
    prompt
}

/// User turn asking the model to filter candidate facts down to the keepers.
#[must_use]
pub fn evaluation_prompt(dislikes: &[String], known: &[String], pending: &[String]) -> String {
    let mut prompt = String::new();
    push_block(&mut prompt, "User's dislikes:", dislikes);
    push_block(&mut prompt, "Facts the user was already given:", known);
    push_tagged(&mut prompt, PENDING_FACTS_OPEN, PENDING_FACTS_CLOSE, pending);
    prompt.push_str(EVALUATION_GUIDANCE);
    prompt
}

/// User turn asking for 2-5 word forms of each fact, in order.
#[must_use]
pub fn compaction_prompt(facts: &[String]) -> String {
    let mut prompt = String::new();
    push_tagged(&mut prompt, KNOWN_FACTS_OPEN, KNOWN_FACTS_CLOSE, facts);
    prompt.push_str(COMPACTION_GUIDANCE);
    prompt
}

fn push_block(out: &mut String, heading: &str, lines: &[String]) {
    let _ = writeln!(out, "{heading}");
    for line in lines {
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(out);
}

fn push_tagged(out: &mut String, open: &str, close: &str, lines: &[String]) {
    let _ = writeln!(out, "{open}");
    for line in lines {
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(out, "{close}");
    let _ = writeln!(out);
}
