//! Element-level convenience waits built on the poller
//!
//! Each wait decides its own boolean and inverts it when
//! `fail_on_present` is set; the poller never negates. Visibility and
//! enabled gates are part of that boolean, so they are applied before the
//! inversion.

use std::future::Future;
use std::sync::Arc;

use mobisync_core_types::{ElementHandle, ElementLocator, LocatorStrategy, SyncError};

use crate::errors::WaitError;
use crate::poller::ConditionPoller;
use crate::types::{WaitOptions, WaitResult};

pub struct ElementWaits {
    poller: Arc<ConditionPoller>,
    locator: Arc<dyn ElementLocator>,
}

/// Missing or stale elements read as "not yet"; anything else is a real failure.
async fn read_flag<F>(read: F) -> Result<bool, WaitError>
where
    F: Future<Output = Result<bool, SyncError>>,
{
    match read.await {
        Ok(flag) => Ok(flag),
        Err(err) if err.is_retryable() => Ok(false),
        Err(err) => Err(err.into()),
    }
}

async fn gates_pass(element: &ElementHandle, options: &WaitOptions) -> Result<bool, WaitError> {
    if options.require_visible && !read_flag(element.is_displayed()).await? {
        return Ok(false);
    }
    if options.require_enabled && !read_flag(element.is_enabled()).await? {
        return Ok(false);
    }
    Ok(true)
}

impl ElementWaits {
    pub fn new(poller: Arc<ConditionPoller>, locator: Arc<dyn ElementLocator>) -> Self {
        Self { poller, locator }
    }

    fn prepare(
        &self,
        options: WaitOptions,
        operation: &str,
        kind: &str,
        strategy: LocatorStrategy,
        selector: &str,
    ) -> WaitOptions {
        let mut options = self.poller.apply_default_strictness(options);
        options
            .operation
            .get_or_insert_with(|| operation.to_string());
        options.condition_kind.get_or_insert_with(|| kind.to_string());
        options.error_message.get_or_insert_with(|| {
            let expectation = if options.fail_on_present { "still" } else { "never" };
            format!("{strategy}={selector} {expectation} {kind}")
        });
        options
    }

    async fn locate(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
    ) -> Result<Option<ElementHandle>, WaitError> {
        match self.locator.find_element(strategy, selector, None).await {
            Ok(element) => Ok(Some(element)),
            Err(err) if err.is_retryable() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Multi-lookup so absence is an empty list rather than an error
    async fn locate_first(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
    ) -> Result<Option<ElementHandle>, WaitError> {
        match self.locator.find_elements(strategy, selector).await {
            Ok(found) => Ok(found.into_iter().next()),
            Err(err) if err.is_retryable() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Wait until at least one element matches, or none when negated
    pub async fn wait_for_element_present(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: WaitOptions,
    ) -> Result<WaitResult<Option<ElementHandle>>, WaitError> {
        let options = self.prepare(options, "waitForElement", "present", strategy, selector);
        let negate = options.fail_on_present;
        let gates = options.clone();
        let gates = &gates;
        self.poller
            .wait_for_condition(
                move || self.locate_first(strategy, selector),
                move |found: Option<ElementHandle>| async move {
                    let present = match &found {
                        Some(element) => gates_pass(element, gates).await?,
                        None => false,
                    };
                    Ok(present != negate)
                },
                options,
            )
            .await
    }

    pub async fn wait_for_element_visible(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: WaitOptions,
    ) -> Result<WaitResult<Option<ElementHandle>>, WaitError> {
        let options = self.prepare(options, "waitForElementVisible", "visible", strategy, selector);
        let negate = options.fail_on_present;
        let gates = options.clone();
        let gates = &gates;
        self.poller
            .wait_for_condition(
                move || self.locate(strategy, selector),
                move |found: Option<ElementHandle>| async move {
                    let visible = match &found {
                        Some(element) => {
                            gates_pass(element, gates).await?
                                && read_flag(element.is_displayed()).await?
                        }
                        None => false,
                    };
                    Ok(visible != negate)
                },
                options,
            )
            .await
    }

    pub async fn wait_for_element_enabled(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: WaitOptions,
    ) -> Result<WaitResult<Option<ElementHandle>>, WaitError> {
        let options = self.prepare(options, "waitForElementEnabled", "enabled", strategy, selector);
        let negate = options.fail_on_present;
        let gates = options.clone();
        let gates = &gates;
        self.poller
            .wait_for_condition(
                move || self.locate(strategy, selector),
                move |found: Option<ElementHandle>| async move {
                    let enabled = match &found {
                        Some(element) => {
                            gates_pass(element, gates).await?
                                && read_flag(element.is_enabled()).await?
                        }
                        None => false,
                    };
                    Ok(enabled != negate)
                },
                options,
            )
            .await
    }

    pub async fn wait_for_attribute_equals(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        attribute: &str,
        expected: &str,
        options: WaitOptions,
    ) -> Result<WaitResult<Option<ElementHandle>>, WaitError> {
        let options = self.prepare(options, "waitForAttribute", "attribute", strategy, selector);
        let negate = options.fail_on_present;
        let gates = options.clone();
        let gates = &gates;
        self.poller
            .wait_for_condition(
                move || self.locate(strategy, selector),
                move |found: Option<ElementHandle>| async move {
                    let equal = match &found {
                        Some(element) => {
                            gates_pass(element, gates).await?
                                && match element.attribute(attribute).await {
                                    Ok(value) => value.as_deref() == Some(expected),
                                    Err(err) if err.is_retryable() => false,
                                    Err(err) => return Err(err.into()),
                                }
                        }
                        None => false,
                    };
                    Ok(equal != negate)
                },
                options,
            )
            .await
    }

    pub async fn wait_for_text_equals(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        expected: &str,
        options: WaitOptions,
    ) -> Result<WaitResult<Option<ElementHandle>>, WaitError> {
        let options = self.prepare(options, "waitForText", "text", strategy, selector);
        let negate = options.fail_on_present;
        let gates = options.clone();
        let gates = &gates;
        self.poller
            .wait_for_condition(
                move || self.locate(strategy, selector),
                move |found: Option<ElementHandle>| async move {
                    let equal = match &found {
                        Some(element) => {
                            gates_pass(element, gates).await?
                                && match element.text().await {
                                    Ok(text) => text == expected,
                                    Err(err) if err.is_retryable() => false,
                                    Err(err) => return Err(err.into()),
                                }
                        }
                        None => false,
                    };
                    Ok(equal != negate)
                },
                options,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::WaitMetricsTracker;
    use crate::timeouts::TimeoutResolver;
    use mobisync_core_types::memory::{InMemoryElement, InMemoryLocator};
    use std::time::Duration;

    fn waits(locator: Arc<InMemoryLocator>) -> ElementWaits {
        let poller = ConditionPoller::new(
            Arc::new(TimeoutResolver::new()),
            Arc::new(WaitMetricsTracker::new()),
        );
        ElementWaits::new(Arc::new(poller), locator)
    }

    #[tokio::test(start_paused = true)]
    async fn present_waits_for_late_element() {
        let locator = InMemoryLocator::new();
        let waits = waits(locator.clone());

        let late = locator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            late.insert(LocatorStrategy::Id, "toast", InMemoryElement::new("toast-1"));
        });

        let result = waits
            .wait_for_element_present(
                LocatorStrategy::Id,
                "toast",
                WaitOptions::new().with_timeout(5000).with_interval(500),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.operations, 4);
        let element = result.value.flatten().unwrap();
        assert_eq!(element.id(), "toast-1");
    }

    #[tokio::test(start_paused = true)]
    async fn negated_present_waits_for_absence() {
        let locator = InMemoryLocator::new();
        locator.insert(LocatorStrategy::Id, "spinner", InMemoryElement::new("spinner"));
        let waits = waits(locator.clone());

        let gone = locator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            gone.remove(LocatorStrategy::Id, "spinner");
        });

        let result = waits
            .wait_for_element_present(
                LocatorStrategy::Id,
                "spinner",
                WaitOptions::new().with_timeout(3000).with_interval(250).negate(),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(matches!(result.value, Some(None)));
        assert_eq!(result.elapsed_time, 750);
    }

    #[tokio::test(start_paused = true)]
    async fn visible_treats_missing_element_as_not_yet() {
        let locator = InMemoryLocator::new();
        let waits = waits(locator.clone());

        let err = waits
            .wait_for_element_visible(
                LocatorStrategy::AccessibilityId,
                "menu",
                WaitOptions::new().with_timeout(1000).with_interval(200),
            )
            .await
            .unwrap_err();
        // strict by default, and only after the whole budget
        match err {
            WaitError::Timeout { attempts, message, .. } => {
                assert_eq!(attempts, 5);
                assert_eq!(message, "accessibility id=menu never visible");
            }
            other => panic!("unexpected error: {other}"),
        }

        let menu = InMemoryElement::new("menu");
        menu.set_displayed(false);
        locator.insert(LocatorStrategy::AccessibilityId, "menu", menu);
        let hidden = waits
            .wait_for_element_visible(
                LocatorStrategy::AccessibilityId,
                "menu",
                WaitOptions::new().with_timeout(1000).negate(),
            )
            .await
            .unwrap();
        assert!(hidden.success);
        assert_eq!(hidden.operations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn enabled_gate_applies_before_inversion() {
        let locator = InMemoryLocator::new();
        let submit = InMemoryElement::new("submit");
        submit.set_displayed(false);
        locator.insert(LocatorStrategy::Id, "submit", submit.clone());
        let waits = waits(locator.clone());

        let blocked = waits
            .wait_for_element_enabled(
                LocatorStrategy::Id,
                "submit",
                WaitOptions::new().with_timeout(600).require_visible().strict(false),
            )
            .await
            .unwrap();
        assert!(blocked.timed_out);

        // hidden element fails the gate, so the inverted wait succeeds at once
        let inverted = waits
            .wait_for_element_enabled(
                LocatorStrategy::Id,
                "submit",
                WaitOptions::new().with_timeout(600).require_visible().negate(),
            )
            .await
            .unwrap();
        assert!(inverted.success);
        assert_eq!(inverted.operations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn present_honours_visibility_and_enabled_gates() {
        let locator = InMemoryLocator::new();
        let banner = InMemoryElement::new("banner");
        banner.set_displayed(false);
        banner.set_enabled(false);
        locator.insert(LocatorStrategy::Id, "banner", banner.clone());
        let waits = waits(locator.clone());

        let hidden = waits
            .wait_for_element_present(
                LocatorStrategy::Id,
                "banner",
                WaitOptions::new()
                    .with_timeout(600)
                    .require_visible()
                    .require_enabled()
                    .strict(false),
            )
            .await
            .unwrap();
        assert!(!hidden.success);
        assert!(hidden.timed_out);

        banner.set_displayed(true);
        banner.set_enabled(true);
        let shown = waits
            .wait_for_element_present(
                LocatorStrategy::Id,
                "banner",
                WaitOptions::new()
                    .with_timeout(600)
                    .require_visible()
                    .require_enabled(),
            )
            .await
            .unwrap();
        assert!(shown.success);
        assert_eq!(shown.operations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn present_rides_out_stale_lookups() {
        let locator = InMemoryLocator::new();
        locator.insert(LocatorStrategy::Id, "list", InMemoryElement::new("list"));
        locator.fail_with(LocatorStrategy::Id, "list", SyncError::Stale("list".into()));
        let waits = waits(locator.clone());

        let recover = locator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            recover.clear_failure(LocatorStrategy::Id, "list");
        });

        let result = waits
            .wait_for_element_present(
                LocatorStrategy::Id,
                "list",
                WaitOptions::new().with_timeout(2000).with_interval(200),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.elapsed_time, 400);

        locator.fail_with(LocatorStrategy::Id, "list", SyncError::Io("socket closed".into()));
        let err = waits
            .wait_for_element_present(LocatorStrategy::Id, "list", WaitOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Locator(SyncError::Io(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn attribute_and_text_waits() {
        let locator = InMemoryLocator::new();
        let field = InMemoryElement::new("email");
        field.set_attribute("value", "");
        locator.insert(LocatorStrategy::Id, "email", field.clone());
        let waits = waits(locator.clone());

        let typist = field.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            typist.set_attribute("value", "qa@example.com");
            typist.set_text("qa@example.com");
        });

        let attribute = waits
            .wait_for_attribute_equals(
                LocatorStrategy::Id,
                "email",
                "value",
                "qa@example.com",
                WaitOptions::new().with_timeout(2000).with_interval(100),
            )
            .await
            .unwrap();
        assert!(attribute.success);
        assert_eq!(attribute.elapsed_time, 300);

        let text = waits
            .wait_for_text_equals(
                LocatorStrategy::Id,
                "email",
                "qa@example.com",
                WaitOptions::new().with_timeout(2000),
            )
            .await
            .unwrap();
        assert_eq!(text.operations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_locator_failures_abort_strict_waits() {
        let locator = InMemoryLocator::new();
        locator.fail_with(LocatorStrategy::Id, "io", SyncError::Io("socket closed".into()));
        let waits = waits(locator.clone());

        let err = waits
            .wait_for_element_visible(LocatorStrategy::Id, "io", WaitOptions::new().with_timeout(1000))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Locator(SyncError::Io(_))));
        assert_eq!(locator.calls_for(LocatorStrategy::Id, "io"), 1);
    }
}
