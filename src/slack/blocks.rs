//! Slack Block Kit builders for relayed output.

use slack_morphism::prelude::{SlackBlock, SlackBlockPlainText, SlackBlockText, SlackSectionBlock};

/// Section block rendering `text` as mrkdwn.
#[must_use]
pub fn markdown_section(text: &str) -> SlackBlock {
    SlackBlock::Section(
        SlackSectionBlock::new().with_text(SlackBlockText::MarkDown(text.to_owned().into())),
    )
}

/// Section block rendering `text` literally.
#[must_use]
pub fn plain_section(text: &str) -> SlackBlock {
    SlackBlock::Section(
        SlackSectionBlock::new()
            .with_text(SlackBlockText::Plain(SlackBlockPlainText::new(text.to_owned()))),
    )
}
