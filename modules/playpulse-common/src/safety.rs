use regex::Regex;
use std::sync::LazyLock;

// Reddit usernames: u/name or /u/name. Subreddit mentions (r/name) are kept;
// they identify communities, not people.
static REDDIT_USER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/?u/[\w-]+").unwrap());

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap()
});

// Phone numbers: optional country code, then area code + 7 digits with
// hyphen/dot/space/paren separators.
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap()
});

/// Mask personally identifiable information in text.
///
/// Usernames become `[user]`, emails `[email]`, phone numbers `[phone]`.
pub fn mask_pii(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let masked = REDDIT_USER_RE.replace_all(text, "[user]");
    let masked = EMAIL_RE.replace_all(&masked, "[email]");
    let masked = PHONE_RE.replace_all(&masked, "[phone]");
    masked.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_reddit_usernames_both_forms() {
        assert_eq!(mask_pii("thanks u/dev_guy!"), "thanks [user]!");
        assert_eq!(mask_pii("ping /u/Someone-Else"), "ping [user]");
    }

    #[test]
    fn keeps_subreddit_mentions() {
        assert_eq!(mask_pii("Post on r/IndieDev."), "Post on r/IndieDev.");
    }

    #[test]
    fn masks_emails_and_phones() {
        assert_eq!(mask_pii("mail me at dev@studio.io"), "mail me at [email]");
        assert_eq!(mask_pii("call 555-123-4567 now"), "call [phone] now");
        assert_eq!(mask_pii("call +1 (555) 123.4567"), "call [phone]");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(mask_pii(""), "");
    }
}
