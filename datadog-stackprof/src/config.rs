// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod parse_env {
    use std::{env, str::FromStr};

    pub fn int<T: FromStr>(name: &str) -> Option<T> {
        env::var(name).ok()?.parse::<T>().ok()
    }

    pub fn bool(name: &str) -> Option<bool> {
        match env::var(name).ok()?.as_str() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
            _ => Some(false),
        }
    }

    pub fn str_not_empty(name: &str) -> Option<String> {
        env::var(name).ok().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::parse_env;
    use std::env;

    #[test]
    fn bool_accepts_truthy_spellings() {
        env::set_var("STACKPROF_TEST_BOOL_TRUTHY", "true");
        assert_eq!(parse_env::bool("STACKPROF_TEST_BOOL_TRUTHY"), Some(true));

        env::set_var("STACKPROF_TEST_BOOL_FALSY", "no");
        assert_eq!(parse_env::bool("STACKPROF_TEST_BOOL_FALSY"), Some(false));

        assert_eq!(parse_env::bool("STACKPROF_TEST_BOOL_UNSET"), None);
    }

    #[test]
    fn int_ignores_garbage() {
        env::set_var("STACKPROF_TEST_INT", "not a number");
        assert_eq!(parse_env::int::<usize>("STACKPROF_TEST_INT"), None);
    }
}
