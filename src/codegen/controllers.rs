//! Controller partial: per-role subscribe/publish/wait-for methods.

use crate::asyncapi::{Channel, Message, Specification};
use crate::runtime::CorrelationLocator;

use super::naming::{field_identifier, snake_identifier};
use super::Role;

/// The operation a role receives on. AsyncAPI documents speak from the
/// application's perspective: a `publish` operation is what others publish,
/// so the application receives it; a `subscribe` operation is what others
/// subscribe to, so the application sends it. The user is the mirror.
fn inbound<'a>(channel: &'a Channel, role: Role) -> Option<&'a Message> {
    let operation = match role {
        Role::Application => channel.publish.as_ref(),
        Role::User => channel.subscribe.as_ref(),
        Role::Types => None,
    };
    operation.and_then(|op| op.message.as_ref())
}

/// The operation a role sends on; the mirror of [`inbound`].
fn outbound<'a>(channel: &'a Channel, role: Role) -> Option<&'a Message> {
    let operation = match role {
        Role::Application => channel.subscribe.as_ref(),
        Role::User => channel.publish.as_ref(),
        Role::Types => None,
    };
    operation.and_then(|op| op.message.as_ref())
}

/// Constructor expression for the channel's correlation locator, when its
/// inbound message declares one on a non-parameterized channel.
fn locator_expression(message: &Message) -> Option<String> {
    match CorrelationLocator::parse(&message.correlation_id_location)? {
        CorrelationLocator::Header { key } => Some(format!(
            "CorrelationLocator::header(\"{key}\")"
        )),
        CorrelationLocator::Payload { path } => {
            let segments: Vec<String> = path
                .iter()
                .map(|segment| format!("\"{segment}\".to_string()"))
                .collect();
            Some(format!(
                "CorrelationLocator::payload(vec![{}])",
                segments.join(", ")
            ))
        }
    }
}

struct AddressBinding {
    /// Extra method arguments for channel parameters, e.g. `, id: &str`.
    arguments: String,
    /// Expression evaluating to the channel address.
    expression: String,
}

fn bind_address(channel: &Channel) -> AddressBinding {
    let parameters = channel.address_parameters();
    if parameters.is_empty() {
        return AddressBinding {
            arguments: String::new(),
            expression: format!("\"{}\"", channel.address),
        };
    }
    let mut arguments = String::new();
    let mut address = channel.address.clone();
    for parameter in &parameters {
        let identifier = field_identifier(parameter);
        arguments.push_str(&format!(", {identifier}: &str"));
        // Parameter tokens become format captures of the method arguments.
        address = address.replace(&format!("{{{parameter}}}"), &format!("{{{identifier}}}"));
    }
    AddressBinding {
        arguments,
        expression: format!("&format!(\"{address}\")"),
    }
}

pub(super) fn render(out: &mut String, spec: &Specification, role: Role) {
    let (controller, doc) = match role {
        Role::Application => (
            "AppController",
            "Application-side controller: receives requests, publishes responses.",
        ),
        Role::User => (
            "UserController",
            "User-side controller: publishes requests, receives responses.",
        ),
        Role::Types => return,
    };

    // Correlation locators for every inbound channel that declares one.
    let mut locators = String::new();
    for channel in spec.channels.values() {
        if !channel.address_parameters().is_empty() {
            continue;
        }
        if let Some(expression) = inbound(channel, role).and_then(locator_expression) {
            locators.push_str(&format!(
                "\n            .with_correlation_locator(\"{}\", {expression})",
                channel.address
            ));
        }
    }

    out.push_str(&format!(
        "/// {doc}\n\
         pub struct {controller} {{\n\
        \x20   controller: Controller,\n\
         }}\n\n\
         impl {controller} {{\n\
        \x20   /// Create a controller bound to `broker`.\n\
        \x20   pub fn new(broker: Arc<dyn BrokerController>) -> Self {{\n\
        \x20       let controller = Controller::new(broker){locators};\n\
        \x20       Self {{ controller }}\n\
        \x20   }}\n\n\
        \x20   /// Attach middlewares, applied around every operation.\n\
        \x20   pub fn with_middlewares(mut self, middlewares: Vec<Arc<dyn Middleware>>) -> Self {{\n\
        \x20       self.controller = self.controller.with_middlewares(middlewares);\n\
        \x20       self\n\
        \x20   }}\n\n"
    ));

    for channel in spec.channels.values() {
        let base = snake_identifier(&channel.name);
        let binding = bind_address(channel);
        let arguments = &binding.arguments;
        let address = &binding.expression;

        if let Some(message) = inbound(channel, role) {
            let name = &message.name;
            out.push_str(&format!(
                "    /// Subscribe to messages on `{channel_address}`.\n\
                \x20   pub async fn subscribe_{base}(\n\
                \x20       &self{arguments},\n\
                \x20       handler: impl Fn({name}Message) + Send + Sync + 'static,\n\
                \x20   ) -> Result<(), BrokerError> {{\n\
                \x20       let handler = Arc::new(handler);\n\
                \x20       self.controller\n\
                \x20           .subscribe(\n\
                \x20               {address},\n\
                \x20               Arc::new(move |message| {{\n\
                \x20                   let handler = Arc::clone(&handler);\n\
                \x20                   Box::pin(async move {{\n\
                \x20                       let message = {name}Message::from_broker_message(message)?;\n\
                \x20                       handler(message);\n\
                \x20                       Ok(())\n\
                \x20                   }})\n\
                \x20               }}),\n\
                \x20           )\n\
                \x20           .await\n\
                \x20   }}\n\n",
                channel_address = channel.address,
            ));

            if channel.address_parameters().is_empty()
                && !message.correlation_id_location.is_empty()
            {
                render_wait_for(out, channel, &base, name);
            }
        }

        if let Some(message) = outbound(channel, role) {
            let name = &message.name;
            out.push_str(&format!(
                "    /// Publish a message on `{channel_address}`.\n\
                \x20   pub async fn publish_{base}(\n\
                \x20       &self{arguments},\n\
                \x20       message: {name}Message,\n\
                \x20   ) -> Result<(), BrokerError> {{\n\
                \x20       self.controller\n\
                \x20           .publish({address}, message.to_broker_message()?)\n\
                \x20           .await\n\
                \x20   }}\n\n",
                channel_address = channel.address,
            ));
        }
    }

    out.push_str(
        "    /// Cancel every subscription owned by this controller.\n\
        \x20   pub async fn close(&self) {\n\
        \x20       self.controller.close().await;\n\
        \x20   }\n\
         }\n\n",
    );
}

fn render_wait_for(out: &mut String, channel: &Channel, base: &str, name: &str) {
    out.push_str(&format!(
        "    /// Run `publish` and await the response on `{channel_address}` whose\n\
        \x20   /// correlation id matches the request's.\n\
        \x20   pub async fn wait_for_{base}<F, Fut>(\n\
        \x20       &self,\n\
        \x20       request: &impl CorrelatedMessage,\n\
        \x20       publish: F,\n\
        \x20   ) -> Result<{name}Message, BrokerError>\n\
        \x20   where\n\
        \x20       F: FnOnce() -> Fut,\n\
        \x20       Fut: Future<Output = Result<(), BrokerError>>,\n\
        \x20   {{\n\
        \x20       let id = request.correlation_id().ok_or_else(|| {{\n\
        \x20           BrokerError::Unmarshal(\"request carries no correlation id\".to_string())\n\
        \x20       }})?;\n\
        \x20       let waiter = self.controller.wait_for(\"{channel_address}\", &id).await?;\n\
        \x20       publish().await?;\n\
        \x20       let message = waiter.wait().await?;\n\
        \x20       {name}Message::from_broker_message(message)\n\
        \x20   }}\n\n",
        channel_address = channel.address,
    ));
}
