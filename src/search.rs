use log::{debug, info, warn};

use crate::job_event::JobStatus;
use crate::query_set::{
    create_search_tags, decode_arr, encode_arr, merge_queryset, remove_terms_from_queryset,
    search_input_queryset, QuerySet,
};

/// Name of the URL parameter holding the encoded query set
pub const SEARCH_PARAM: &str = "job_event_search";

/// Tags for filters the view manages itself, never shown to the user
pub const RESERVED_TAG_PREFIXES: [&str; 4] = ["event", "-event", "page_size", "order_by"];

pub const PLACEHOLDER_DEFAULT: &str = "Search";
pub const PLACEHOLDER_RUNNING: &str = "Cannot search running job";

/// Owner of the view's URL state. `go` transitions to the new search and
/// causes the paged fetch to reload.
pub trait SearchNavigator {
    fn search_param(&self) -> &[String];
    fn go(&mut self, search_param: Vec<String>);
}

/// In-process URL state for the output view
#[derive(Debug, Clone, Default)]
pub struct OutputQuery {
    search_param: Vec<String>,
    pending_reload: bool,
}

impl OutputQuery {
    pub fn new(search_param: Vec<String>) -> Self {
        Self {
            search_param,
            pending_reload: false,
        }
    }

    /// Decoded query set, empty if the parameter is unreadable
    pub fn queryset(&self) -> QuerySet {
        current_queryset(self)
    }

    /// Returns true once per transition
    pub fn take_reload(&mut self) -> bool {
        std::mem::take(&mut self.pending_reload)
    }

    /// Put back a previous parameter without triggering a reload
    pub fn restore(&mut self, search_param: Vec<String>) {
        self.search_param = search_param;
        self.pending_reload = false;
    }
}

impl SearchNavigator for OutputQuery {
    fn search_param(&self) -> &[String] {
        &self.search_param
    }

    fn go(&mut self, search_param: Vec<String>) {
        debug!("{SEARCH_PARAM} -> {search_param:?}");
        self.search_param = search_param;
        self.pending_reload = true;
    }
}

pub fn is_reserved_tag(tag: &str) -> bool {
    RESERVED_TAG_PREFIXES
        .iter()
        .any(|prefix| tag.starts_with(prefix))
}

/// User-visible tags for a query set
pub fn get_search_tags(queryset: &QuerySet) -> Vec<String> {
    create_search_tags(queryset)
        .into_iter()
        .filter(|tag| !is_reserved_tag(tag))
        .collect()
}

/// Search box state for the output view. Locked while the job runs.
#[derive(Debug, Clone)]
pub struct JobSearch {
    pub value: String,
    pub tags: Vec<String>,
    pub disabled: bool,
    /// Set by the view when the server rejects the active filters
    pub rejected: bool,
    /// Search syntax panel visibility
    pub key: bool,
    pub placeholder: &'static str,
    running: bool,
}

impl JobSearch {
    pub fn new(nav: &impl SearchNavigator) -> Self {
        Self {
            value: String::new(),
            tags: get_search_tags(&current_queryset(nav)),
            disabled: false,
            rejected: false,
            key: false,
            placeholder: PLACEHOLDER_DEFAULT,
            running: false,
        }
    }

    pub fn submit_search(&mut self, nav: &mut impl SearchNavigator) {
        let input = search_input_queryset(&self.value);
        if input.is_empty() {
            return;
        }

        let merged = merge_queryset(&current_queryset(&*nav), &input);
        info!("Searching job events: {}", merged);

        self.value.clear();
        self.tags = get_search_tags(&merged);
        self.disabled = true;
        nav.go(encode_arr(&merged));
    }

    pub fn remove_search_tag(&mut self, index: usize, nav: &mut impl SearchNavigator) {
        let Some(tag) = self.tags.get(index).cloned() else {
            return;
        };

        let remaining = remove_terms_from_queryset(&current_queryset(&*nav), &tag);
        debug!("Removed search tag {tag:?}");

        self.tags = get_search_tags(&remaining);
        self.disabled = true;
        nav.go(encode_arr(&remaining));
    }

    pub fn clear_search(&mut self, nav: &mut impl SearchNavigator) {
        self.tags.clear();
        nav.go(Vec::new());
    }

    pub fn toggle_search_key(&mut self) {
        self.key = !self.key;
    }

    /// Job status observer
    pub fn on_job_status(&mut self, status: &JobStatus) {
        self.running = status.is_running();
        if self.running {
            self.disabled = true;
            self.placeholder = PLACEHOLDER_RUNNING;
        } else {
            self.disabled = false;
            self.placeholder = PLACEHOLDER_DEFAULT;
        }
    }

    /// The reload triggered by the last transition finished
    pub fn on_transition_complete(&mut self) {
        if !self.running {
            self.disabled = false;
        }
    }

    pub fn set_rejected(&mut self, rejected: bool) {
        self.rejected = rejected;
    }

    /// Recompute tags after the URL state changed underneath us
    pub fn sync_tags(&mut self, nav: &impl SearchNavigator) {
        self.tags = get_search_tags(&current_queryset(nav));
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

fn current_queryset(nav: &impl SearchNavigator) -> QuerySet {
    decode_arr(nav.search_param()).unwrap_or_else(|e| {
        warn!("Ignoring unreadable {SEARCH_PARAM} parameter: {e}");
        QuerySet::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nav_with(terms: &str) -> OutputQuery {
        OutputQuery::new(encode_arr(&search_input_queryset(terms)))
    }

    #[test]
    fn reserved_tags_are_hidden() {
        let queryset = search_input_queryset("id:>1 task:set page_size:50 order_by:id");
        assert_eq!(get_search_tags(&queryset), vec!["id:>1", "task:set"]);
    }

    #[test]
    fn negated_event_filters_are_hidden() {
        let queryset = search_input_queryset("-event:playbook_on_stats event:runner_on_ok host:3");
        assert_eq!(get_search_tags(&queryset), vec!["host:3"]);
    }

    #[test]
    fn submit_merges_and_transitions() {
        let mut nav = nav_with("order_by:counter task:setup");
        let mut search = JobSearch::new(&nav);
        assert_eq!(search.tags, vec!["task:setup"]);

        search.value = "host_name:web".to_string();
        search.submit_search(&mut nav);

        assert!(nav.take_reload());
        assert!(search.disabled);
        assert!(search.value.is_empty());
        assert_eq!(search.tags, vec!["task:setup", "host_name:web"]);
        assert_eq!(
            nav.queryset(),
            QuerySet::from_pairs([
                ("order_by", "counter"),
                ("task__icontains", "setup"),
                ("host_name__icontains", "web"),
            ])
        );
    }

    #[test]
    fn blank_submit_is_ignored() {
        let mut nav = nav_with("");
        let mut search = JobSearch::new(&nav);
        search.value = "   ".to_string();

        search.submit_search(&mut nav);

        assert!(!nav.take_reload());
        assert!(!search.disabled);
    }

    #[test]
    fn remove_tag_keeps_reserved_filters() {
        let mut nav = nav_with("order_by:counter task:setup id:>4");
        let mut search = JobSearch::new(&nav);

        search.remove_search_tag(0, &mut nav);

        assert!(nav.take_reload());
        assert_eq!(search.tags, vec!["id:>4"]);
        assert_eq!(nav.queryset().get("order_by"), Some("counter"));
        assert_eq!(nav.queryset().get("task__icontains"), None);
    }

    #[test]
    fn remove_multi_word_tag() {
        let mut nav = nav_with(r#"task:"Gather Facts" id:>1"#);
        let mut search = JobSearch::new(&nav);
        assert_eq!(search.tags, vec![r#"task:"Gather Facts""#, "id:>1"]);

        search.remove_search_tag(0, &mut nav);

        assert!(nav.take_reload());
        assert_eq!(search.tags, vec!["id:>1"]);
        assert_eq!(nav.queryset(), QuerySet::from_pairs([("id__gt", "1")]));
    }

    #[test]
    fn remove_out_of_range_is_noop() {
        let mut nav = nav_with("task:setup");
        let mut search = JobSearch::new(&nav);

        search.remove_search_tag(5, &mut nav);

        assert!(!nav.take_reload());
        assert_eq!(search.tags, vec!["task:setup"]);
    }

    #[test]
    fn clear_empties_param() {
        let mut nav = nav_with("task:setup");
        let mut search = JobSearch::new(&nav);

        search.clear_search(&mut nav);

        assert!(nav.take_reload());
        assert!(search.tags.is_empty());
        assert!(nav.search_param().is_empty());
    }

    #[test]
    fn running_job_disables_search() {
        let nav = nav_with("");
        let mut search = JobSearch::new(&nav);

        search.on_job_status(&JobStatus::Running);
        assert!(search.disabled);
        assert_eq!(search.placeholder, PLACEHOLDER_RUNNING);

        search.on_transition_complete();
        assert!(search.disabled);

        search.on_job_status(&JobStatus::Successful);
        assert!(!search.disabled);
        assert_eq!(search.placeholder, PLACEHOLDER_DEFAULT);
    }

    #[test]
    fn transition_complete_reenables_finished_job() {
        let mut nav = nav_with("");
        let mut search = JobSearch::new(&nav);
        search.value = "failed".to_string();
        search.submit_search(&mut nav);
        assert!(search.disabled);

        search.on_transition_complete();
        assert!(!search.disabled);
    }

    #[test]
    fn toggle_key_panel() {
        let nav = nav_with("");
        let mut search = JobSearch::new(&nav);
        search.toggle_search_key();
        assert!(search.key);
        search.toggle_search_key();
        assert!(!search.key);
    }
}
