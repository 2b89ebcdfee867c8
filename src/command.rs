//! Command parsing for bot commands in Telegram messages and inline
//! keyboard callbacks.

use crate::store::ReminderTiming;
use crate::workflow::ItemRef;

/// One "Title : link" entry from a /review payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewLine {
    pub title: String,
    pub link: String,
}

/// A /remind request with both required parts present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemindRequest {
    pub target_username: String,
    pub content: String,
}

/// A parsed bot command from a message.
///
/// Payload fields are `Option` where the command is usable without them:
/// a missing review reference means "show the selection keyboard", while a
/// missing required argument (reviewer username, reminder id) means the
/// handler should reply with usage help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    /// Register review requests, one "Title : link" per line.
    Review {
        parsed: Vec<ReviewLine>,
        malformed: Vec<String>,
    },
    ReviewApprove {
        reference: Option<ItemRef>,
    },
    ReviewNeedFix {
        reference: Option<ItemRef>,
        comment: Option<String>,
    },
    ReviewAgain {
        reference: Option<ItemRef>,
    },
    ReviewList,
    /// Broadcast to reviewers immediately, outside the reminder cadence.
    ReviewNotify,
    ReviewerAdd {
        username: Option<String>,
    },
    ReviewerRemove {
        username: Option<String>,
    },
    ReviewerList,
    Remind {
        request: Option<RemindRequest>,
    },
    RemindList,
    RemindDone {
        id: Option<i64>,
    },
}

impl BotCommand {
    /// The slash form, for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            BotCommand::Start => "/start",
            BotCommand::Help => "/help",
            BotCommand::Review { .. } => "/review",
            BotCommand::ReviewApprove { .. } => "/review_approve",
            BotCommand::ReviewNeedFix { .. } => "/review_need_fix",
            BotCommand::ReviewAgain { .. } => "/review_again",
            BotCommand::ReviewList => "/review_list",
            BotCommand::ReviewNotify => "/review_notify",
            BotCommand::ReviewerAdd { .. } => "/reviewer_add",
            BotCommand::ReviewerRemove { .. } => "/reviewer_remove",
            BotCommand::ReviewerList => "/reviewer_list",
            BotCommand::Remind { .. } => "/remind",
            BotCommand::RemindList => "/remind_list",
            BotCommand::RemindDone { .. } => "/remind_done",
        }
    }
}

/// Result of parsing a message for bot commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// The message is not a command at all.
    NotCommand,
    /// A command explicitly addressed to a different bot, e.g.
    /// `/review@SomeOtherBot`. Group chats route commands this way when
    /// several bots are present.
    OtherBot,
    /// Starts like a command but the name is not one of ours.
    UnknownCommand { attempted: String },
    /// A valid command was found.
    Command(BotCommand),
}

/// Parse a message body for bot commands.
///
/// # Command format
///
/// A command is the first token of the message: `/name` or `/name@BotName`
/// (the `@BotName` form is how Telegram clients disambiguate commands in
/// group chats; a mismatched bot name returns [`ParseResult::OtherBot`]).
/// Both the command name and the bot name compare case-insensitively.
///
/// Everything after the first whitespace is the argument text. For /review
/// that text spans the rest of the message, one entry per line; for the
/// other commands it is a single line.
///
/// # Review references
///
/// /review_approve, /review_need_fix and /review_again accept an optional
/// reference: an all-digits argument is an item id, anything else is an
/// exact title. No reference means the handler offers a selection keyboard
/// instead.
pub fn parse_message(text: &str, bot_username: &str) -> ParseResult {
    let text = text.trim();
    if !text.starts_with('/') {
        return ParseResult::NotCommand;
    }

    let (token, args) = match text.split_once(|c: char| c.is_whitespace()) {
        Some((token, rest)) => (token, rest.trim()),
        None => (text, ""),
    };

    let name = &token[1..];
    if name.is_empty() {
        return ParseResult::NotCommand;
    }

    let name = match name.split_once('@') {
        Some((name, addressee)) => {
            if !addressee.eq_ignore_ascii_case(bot_username) {
                return ParseResult::OtherBot;
            }
            name
        }
        None => name,
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "start" => BotCommand::Start,
        "help" => BotCommand::Help,
        "review" => {
            let (parsed, malformed) = parse_review_payload(args);
            BotCommand::Review { parsed, malformed }
        }
        "review_approve" => BotCommand::ReviewApprove {
            reference: parse_item_ref(args),
        },
        "review_need_fix" => {
            let (reference, comment) = parse_need_fix_args(args);
            BotCommand::ReviewNeedFix { reference, comment }
        }
        "review_again" => BotCommand::ReviewAgain {
            reference: parse_item_ref(args),
        },
        "review_list" => BotCommand::ReviewList,
        "review_notify" => BotCommand::ReviewNotify,
        "reviewer_add" => BotCommand::ReviewerAdd {
            username: parse_username(args),
        },
        "reviewer_remove" => BotCommand::ReviewerRemove {
            username: parse_username(args),
        },
        "reviewer_list" => BotCommand::ReviewerList,
        "remind" => BotCommand::Remind {
            request: parse_remind_args(args),
        },
        "remind_list" => BotCommand::RemindList,
        "remind_done" => BotCommand::RemindDone {
            id: args.parse::<i64>().ok(),
        },
        _ => {
            return ParseResult::UnknownCommand {
                attempted: name.to_string(),
            }
        }
    };

    ParseResult::Command(command)
}

/// Parse a /review payload into per-line results. Blank lines are skipped;
/// unparseable lines are kept verbatim so the reply can echo them back.
fn parse_review_payload(args: &str) -> (Vec<ReviewLine>, Vec<String>) {
    let mut parsed = Vec::new();
    let mut malformed = Vec::new();
    for line in args.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_review_line(line) {
            Some(entry) => parsed.push(entry),
            None => malformed.push(line.to_string()),
        }
    }
    (parsed, malformed)
}

/// Split one review line into title and link.
///
/// A full-width colon counts as a separator. A ` : ` with surrounding
/// spaces wins outright; otherwise the split happens at the first colon
/// that is not part of a URL scheme (`https://...`). Both halves must be
/// non-empty after trimming.
pub fn parse_review_line(line: &str) -> Option<ReviewLine> {
    let line = line.replace('：', ":");

    let (title, link) = match line.split_once(" : ") {
        Some((title, link)) => (title, link),
        None => {
            let idx = find_split_colon(&line)?;
            (&line[..idx], &line[idx + 1..])
        }
    };

    let title = title.trim();
    let link = link.trim();
    if title.is_empty() || link.is_empty() {
        return None;
    }

    Some(ReviewLine {
        title: title.to_string(),
        link: link.to_string(),
    })
}

/// First colon usable as a title/link separator: it needs at least one
/// character before it and must not sit inside `http://`-style schemes.
fn find_split_colon(line: &str) -> Option<usize> {
    for (idx, _) in line.match_indices(':') {
        let before = &line[..idx];
        if before.is_empty() {
            continue;
        }
        if before.ends_with('/') || before.ends_with("http") || before.ends_with("https") {
            continue;
        }
        return Some(idx);
    }
    None
}

fn parse_item_ref(args: &str) -> Option<ItemRef> {
    if args.is_empty() {
        return None;
    }
    match args.parse::<i64>() {
        Ok(id) => Some(ItemRef::ById(id)),
        Err(_) => Some(ItemRef::ByTitle(args.to_string())),
    }
}

/// Split /review_need_fix arguments into an optional reference and an
/// optional `comment="..."` part. The comment may sit anywhere in the
/// argument text; an unterminated quote is not treated as a comment.
fn parse_need_fix_args(args: &str) -> (Option<ItemRef>, Option<String>) {
    const MARKER: &str = "comment=\"";

    if let Some(start) = args.find(MARKER) {
        let after = &args[start + MARKER.len()..];
        if let Some(len) = after.find('"') {
            let comment = &after[..len];
            let rest = format!("{} {}", &args[..start], &after[len + 1..]);
            let comment = (!comment.is_empty()).then(|| comment.to_string());
            return (parse_item_ref(rest.trim()), comment);
        }
    }

    (parse_item_ref(args), None)
}

/// An inline keyboard press, decoded from callback data.
///
/// Review actions carry the item id; the reminder dialog carries the draft
/// id through both steps so no per-user conversation state is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Approve(i64),
    NeedFix(i64),
    Resubmit(i64),
    /// First reminder step: timing chosen, ask for the delay or period.
    RemindTiming {
        draft_id: i64,
        timing: ReminderTiming,
    },
    /// Second reminder step: everything known, activate the draft.
    RemindSchedule {
        draft_id: i64,
        timing: ReminderTiming,
        minutes: i64,
    },
}

/// Decode callback data produced by our own keyboards. Anything else
/// (stale buttons from older versions included) is None.
pub fn parse_callback_data(data: &str) -> Option<CallbackAction> {
    if let Some(rest) = data.strip_prefix("approve:") {
        return rest.parse().ok().map(CallbackAction::Approve);
    }
    if let Some(rest) = data.strip_prefix("needfix:") {
        return rest.parse().ok().map(CallbackAction::NeedFix);
    }
    if let Some(rest) = data.strip_prefix("again:") {
        return rest.parse().ok().map(CallbackAction::Resubmit);
    }
    if let Some(rest) = data.strip_prefix("remind_type:") {
        let (draft_id, timing) = rest.split_once(':')?;
        return Some(CallbackAction::RemindTiming {
            draft_id: draft_id.parse().ok()?,
            timing: ReminderTiming::parse(timing)?,
        });
    }
    if let Some(rest) = data.strip_prefix("remind_sched:") {
        let mut parts = rest.splitn(3, ':');
        let draft_id = parts.next()?.parse().ok()?;
        let timing = ReminderTiming::parse(parts.next()?)?;
        let minutes = parts.next()?.parse().ok()?;
        return Some(CallbackAction::RemindSchedule {
            draft_id,
            timing,
            minutes,
        });
    }
    None
}

fn parse_username(args: &str) -> Option<String> {
    let first = args.split_whitespace().next()?;
    let username = first.trim_start_matches('@');
    if username.is_empty() {
        return None;
    }
    Some(username.to_string())
}

/// Parse `/remind @username content`. Both parts are required.
fn parse_remind_args(args: &str) -> Option<RemindRequest> {
    let (target, content) = args.split_once(|c: char| c.is_whitespace())?;
    let target_username = target.trim_start_matches('@');
    let content = content.trim();
    if target_username.is_empty() || content.is_empty() {
        return None;
    }
    Some(RemindRequest {
        target_username: target_username.to_string(),
        content: content.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "sitrev_bot";

    fn command(cmd: BotCommand) -> ParseResult {
        ParseResult::Command(cmd)
    }

    fn line(title: &str, link: &str) -> ReviewLine {
        ReviewLine {
            title: title.to_string(),
            link: link.to_string(),
        }
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_message("hello there", BOT), ParseResult::NotCommand);
        assert_eq!(parse_message("", BOT), ParseResult::NotCommand);
        assert_eq!(parse_message("/", BOT), ParseResult::NotCommand);
        assert_eq!(
            parse_message("see /review_list above", BOT),
            ParseResult::NotCommand,
            "Commands must start the message"
        );
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse_message("/reveiw Title : link", BOT),
            ParseResult::UnknownCommand {
                attempted: "reveiw".to_string()
            }
        );
    }

    #[test]
    fn test_bot_name_suffix() {
        assert_eq!(
            parse_message("/review_list@sitrev_bot", BOT),
            command(BotCommand::ReviewList)
        );
        assert_eq!(
            parse_message("/review_list@SitRev_Bot", BOT),
            command(BotCommand::ReviewList),
            "Bot name comparison is case-insensitive"
        );
        assert_eq!(
            parse_message("/review_list@other_bot", BOT),
            ParseResult::OtherBot
        );
    }

    #[test]
    fn test_command_name_case_insensitive() {
        assert_eq!(
            parse_message("/Review_List", BOT),
            command(BotCommand::ReviewList)
        );
    }

    #[test]
    fn test_review_single_line() {
        assert_eq!(
            parse_message("/review Sponsor deck : https://example.com/deck", BOT),
            command(BotCommand::Review {
                parsed: vec![line("Sponsor deck", "https://example.com/deck")],
                malformed: vec![],
            })
        );
    }

    #[test]
    fn test_review_multi_line_payload() {
        let text = "/review First : https://a.example\nSecond : https://b.example\n\nbroken line";
        assert_eq!(
            parse_message(text, BOT),
            command(BotCommand::Review {
                parsed: vec![
                    line("First", "https://a.example"),
                    line("Second", "https://b.example"),
                ],
                malformed: vec!["broken line".to_string()],
            })
        );
    }

    #[test]
    fn test_review_empty_payload() {
        assert_eq!(
            parse_message("/review", BOT),
            command(BotCommand::Review {
                parsed: vec![],
                malformed: vec![],
            })
        );
    }

    #[test]
    fn test_review_line_spaced_separator_wins() {
        // The spaced form splits there even when the title holds a colon
        assert_eq!(
            parse_review_line("Re: budget : https://example.com"),
            Some(line("Re: budget", "https://example.com"))
        );
    }

    #[test]
    fn test_review_line_tight_colon() {
        assert_eq!(
            parse_review_line("Design doc: https://example.com/spec"),
            Some(line("Design doc", "https://example.com/spec"))
        );
        assert_eq!(
            parse_review_line("Design doc:https://example.com/spec"),
            Some(line("Design doc", "https://example.com/spec"))
        );
    }

    #[test]
    fn test_review_line_does_not_split_inside_url() {
        // The only colon is the scheme's, so there is no separator
        assert_eq!(parse_review_line("https://example.com/doc"), None);
    }

    #[test]
    fn test_review_line_full_width_colon() {
        assert_eq!(
            parse_review_line("簡報 ： https://example.com/slides"),
            Some(line("簡報", "https://example.com/slides"))
        );
    }

    #[test]
    fn test_review_line_requires_both_halves() {
        assert_eq!(parse_review_line("Title :"), None);
        assert_eq!(parse_review_line(": https://example.com"), None);
        assert_eq!(parse_review_line("no separator here"), None);
    }

    #[test]
    fn test_approve_reference_forms() {
        assert_eq!(
            parse_message("/review_approve", BOT),
            command(BotCommand::ReviewApprove { reference: None })
        );
        assert_eq!(
            parse_message("/review_approve 17", BOT),
            command(BotCommand::ReviewApprove {
                reference: Some(ItemRef::ById(17)),
            })
        );
        assert_eq!(
            parse_message("/review_approve Sponsor deck", BOT),
            command(BotCommand::ReviewApprove {
                reference: Some(ItemRef::ByTitle("Sponsor deck".to_string())),
            }),
            "Multi-word arguments are a single title"
        );
    }

    #[test]
    fn test_need_fix_with_comment() {
        assert_eq!(
            parse_message("/review_need_fix Sponsor deck comment=\"fix the logo\"", BOT),
            command(BotCommand::ReviewNeedFix {
                reference: Some(ItemRef::ByTitle("Sponsor deck".to_string())),
                comment: Some("fix the logo".to_string()),
            })
        );
        assert_eq!(
            parse_message("/review_need_fix comment=\"wrong date\" 4", BOT),
            command(BotCommand::ReviewNeedFix {
                reference: Some(ItemRef::ById(4)),
                comment: Some("wrong date".to_string()),
            }),
            "Comment may precede the reference"
        );
    }

    #[test]
    fn test_need_fix_comment_only_keeps_reference_empty() {
        assert_eq!(
            parse_message("/review_need_fix comment=\"typos everywhere\"", BOT),
            command(BotCommand::ReviewNeedFix {
                reference: None,
                comment: Some("typos everywhere".to_string()),
            })
        );
    }

    #[test]
    fn test_need_fix_unterminated_comment_is_a_title() {
        assert_eq!(
            parse_message("/review_need_fix comment=\"dangling", BOT),
            command(BotCommand::ReviewNeedFix {
                reference: Some(ItemRef::ByTitle("comment=\"dangling".to_string())),
                comment: None,
            })
        );
    }

    #[test]
    fn test_need_fix_empty_comment_is_dropped() {
        assert_eq!(
            parse_message("/review_need_fix 4 comment=\"\"", BOT),
            command(BotCommand::ReviewNeedFix {
                reference: Some(ItemRef::ById(4)),
                comment: None,
            })
        );
    }

    #[test]
    fn test_reviewer_add_strips_at_sign() {
        assert_eq!(
            parse_message("/reviewer_add @alice", BOT),
            command(BotCommand::ReviewerAdd {
                username: Some("alice".to_string()),
            })
        );
        assert_eq!(
            parse_message("/reviewer_add alice extra words", BOT),
            command(BotCommand::ReviewerAdd {
                username: Some("alice".to_string()),
            }),
            "Only the first token is the username"
        );
        assert_eq!(
            parse_message("/reviewer_add", BOT),
            command(BotCommand::ReviewerAdd { username: None })
        );
        assert_eq!(
            parse_message("/reviewer_add @", BOT),
            command(BotCommand::ReviewerAdd { username: None })
        );
    }

    #[test]
    fn test_remind_requires_target_and_content() {
        assert_eq!(
            parse_message("/remind @bob water the plants", BOT),
            command(BotCommand::Remind {
                request: Some(RemindRequest {
                    target_username: "bob".to_string(),
                    content: "water the plants".to_string(),
                }),
            })
        );
        assert_eq!(
            parse_message("/remind @bob", BOT),
            command(BotCommand::Remind { request: None })
        );
        assert_eq!(
            parse_message("/remind", BOT),
            command(BotCommand::Remind { request: None })
        );
    }

    #[test]
    fn test_remind_done_id() {
        assert_eq!(
            parse_message("/remind_done 12", BOT),
            command(BotCommand::RemindDone { id: Some(12) })
        );
        assert_eq!(
            parse_message("/remind_done twelve", BOT),
            command(BotCommand::RemindDone { id: None })
        );
        assert_eq!(
            parse_message("/remind_done", BOT),
            command(BotCommand::RemindDone { id: None })
        );
    }

    #[test]
    fn test_callback_data_rejects_foreign_payloads() {
        assert_eq!(
            parse_callback_data("approve:9"),
            Some(CallbackAction::Approve(9))
        );
        assert_eq!(parse_callback_data("approve:nope"), None);
        assert_eq!(parse_callback_data("remind_type:5:hourly"), None);
        assert_eq!(parse_callback_data("remind_sched:5:once"), None);
        assert_eq!(parse_callback_data("legacy_action:1"), None);
        assert_eq!(parse_callback_data(""), None);
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_message("/start", BOT), command(BotCommand::Start));
        assert_eq!(parse_message("/help", BOT), command(BotCommand::Help));
        assert_eq!(
            parse_message("/review_list", BOT),
            command(BotCommand::ReviewList)
        );
        assert_eq!(
            parse_message("/review_notify", BOT),
            command(BotCommand::ReviewNotify)
        );
        assert_eq!(
            parse_message("/reviewer_list", BOT),
            command(BotCommand::ReviewerList)
        );
        assert_eq!(
            parse_message("/remind_list", BOT),
            command(BotCommand::RemindList)
        );
    }

    #[test]
    fn test_non_ascii_text_does_not_panic() {
        assert_eq!(parse_message("🔥🔥🔥", BOT), ParseResult::NotCommand);
        assert_eq!(parse_message("／review 測試", BOT), ParseResult::NotCommand);
        assert_eq!(
            parse_message("/審核", BOT),
            ParseResult::UnknownCommand {
                attempted: "審核".to_string()
            }
        );
    }
}
