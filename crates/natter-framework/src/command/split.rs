/// Shell-like argument splitting for command arguments.
///
/// Handles:
/// - Whitespace-separated arguments
/// - Quoted strings (single and double quotes)
/// - Backslash escapes inside double quotes and outside quotes
pub fn shell_split(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut escape_next = false;
    let mut quoted = false;

    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if !in_single_quote => {
                escape_next = true;
            }
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                quoted = true;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                quoted = true;
            }
            c if c.is_whitespace() && !in_single_quote && !in_double_quote => {
                if !current.is_empty() || quoted {
                    args.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            _ => {
                current.push(ch);
            }
        }
    }

    if !current.is_empty() || quoted {
        args.push(current);
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_split_simple() {
        assert_eq!(shell_split("hello world"), vec!["hello", "world"]);
    }

    #[test]
    fn test_shell_split_quoted() {
        assert_eq!(
            shell_split(r#"say "hello world" now"#),
            vec!["say", "hello world", "now"]
        );
        assert_eq!(
            shell_split("say 'hello world' now"),
            vec!["say", "hello world", "now"]
        );
    }

    #[test]
    fn test_shell_split_mixed_quotes() {
        assert_eq!(
            shell_split(r#""double's quote" 'single"s quote'"#),
            vec!["double's quote", r#"single"s quote"#]
        );
    }

    #[test]
    fn test_shell_split_escapes() {
        assert_eq!(shell_split(r#"a\ b "c\"d""#), vec!["a b", r#"c"d"#]);
    }

    #[test]
    fn test_shell_split_keeps_empty_quoted_arg() {
        assert_eq!(shell_split(r#"set name """#), vec!["set", "name", ""]);
    }

    #[test]
    fn test_shell_split_blank() {
        assert!(shell_split("").is_empty());
        assert!(shell_split("   \t\n ").is_empty());
    }
}
