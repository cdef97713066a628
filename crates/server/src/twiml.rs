//! Minimal TwiML response builder for the voice webhook loop.

const SAY_VOICE: &str = "Polly.Joanna";

/// Assembles the small TwiML subset the intake loop needs: a spoken
/// prompt, a speech `<Gather>` that posts the next utterance back to us,
/// and a terminal `<Hangup/>`.
#[derive(Default)]
pub struct TwimlBuilder {
    body: String,
}

impl TwimlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: &str) -> Self {
        self.body.push_str(&format!(
            "<Say voice=\"{SAY_VOICE}\">{}</Say>",
            escape_xml(text)
        ));
        self
    }

    /// Speak `prompt` inside a speech gather that posts the caller's next
    /// utterance to `action`.
    pub fn gather_speech(mut self, action: &str, prompt: &str) -> Self {
        self.body.push_str(&format!(
            "<Gather input=\"speech\" action=\"{}\" method=\"POST\" \
             speechTimeout=\"auto\" speechModel=\"phone_call\">\
             <Say voice=\"{SAY_VOICE}\">{}</Say></Gather>",
            escape_xml(action),
            escape_xml(prompt)
        ));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.body.push_str("<Hangup/>");
        self
    }

    pub fn build(self) -> String {
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>{}</Response>", self.body)
    }
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::TwimlBuilder;

    #[test]
    fn gather_wraps_the_prompt_and_points_at_the_action() {
        let twiml = TwimlBuilder::new()
            .gather_speech("/voice/process", "May I have your full name, please?")
            .build();

        assert!(twiml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>"));
        assert!(twiml.contains("<Gather input=\"speech\" action=\"/voice/process\""));
        assert!(twiml.contains("May I have your full name, please?"));
        assert!(twiml.ends_with("</Response>"));
    }

    #[test]
    fn reply_text_is_xml_escaped() {
        let twiml =
            TwimlBuilder::new().say("Drink plenty of water & rest. You'll feel <better>.").build();

        assert!(twiml.contains("water &amp; rest"));
        assert!(twiml.contains("You&apos;ll feel &lt;better&gt;."));
        assert!(!twiml.contains("<better>"));
    }

    #[test]
    fn hangup_closes_the_call() {
        let twiml = TwimlBuilder::new().say("Goodbye.").hangup().build();
        assert!(twiml.contains("<Hangup/>"));
    }
}
