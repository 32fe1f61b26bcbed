use url::Url;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FetcherEvent {
    FetchingStarted {
        repo: String,
    },
    FetchingCompleted {
        repo: String,
    },
    /// Only reported when fetching inline: a background worker never
    /// restarts, so there is nothing to announce.
    FetchingRestarted {
        repo: String,
    },
    RuleDefinitionLocated {
        repo: String,
        definition: String,
    },
    RepoResolved {
        repo: String,
    },
    FetchFailed {
        repo: String,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleEvent {
    Printed {
        repo: String,
        message: String,
    },
    PendingWorkDetected {
        repo: String,
        description: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArchiveEvent {
    DownloadStarted { url: Url },
    DownloadCompleted { url: Url },
}

#[derive(Default, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Event {
    /// The "nothing happened" event.
    #[default]
    Noop,
    FetcherEvent(FetcherEvent),
    RuleEvent(RuleEvent),
    ArchiveEvent(ArchiveEvent),
}

impl From<FetcherEvent> for Event {
    fn from(value: FetcherEvent) -> Self {
        Event::FetcherEvent(value)
    }
}

impl From<RuleEvent> for Event {
    fn from(value: RuleEvent) -> Self {
        Event::RuleEvent(value)
    }
}

impl From<ArchiveEvent> for Event {
    fn from(value: ArchiveEvent) -> Self {
        Event::ArchiveEvent(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl quickcheck::Arbitrary for Event {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            let repo = String::arbitrary(g);
            match g.choose(&[0, 1, 2, 3, 4]).unwrap() {
                0 => Event::Noop,
                1 => FetcherEvent::FetchingStarted { repo }.into(),
                2 => FetcherEvent::FetchFailed {
                    repo,
                    message: String::arbitrary(g),
                }
                .into(),
                3 => RuleEvent::Printed {
                    repo,
                    message: String::arbitrary(g),
                }
                .into(),
                _ => RuleEvent::PendingWorkDetected {
                    repo,
                    description: String::arbitrary(g),
                }
                .into(),
            }
        }
    }
}
