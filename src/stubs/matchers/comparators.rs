use crate::common::data::Method;

pub(crate) trait ValueComparator<T: ?Sized> {
    fn matches(&self, rule_value: &T, req_value: &T) -> bool;
    fn name(&self) -> &str;
}

// ************************************************************************************************
// ExactMatchComparator
// ************************************************************************************************
pub(crate) struct ExactMatchComparator;

impl ValueComparator<u16> for ExactMatchComparator {
    fn matches(&self, rule_value: &u16, req_value: &u16) -> bool {
        rule_value == req_value
    }

    fn name(&self) -> &str {
        "equals"
    }
}

impl ValueComparator<String> for ExactMatchComparator {
    fn matches(&self, rule_value: &String, req_value: &String) -> bool {
        rule_value == req_value
    }

    fn name(&self) -> &str {
        "equals"
    }
}

impl ValueComparator<Method> for ExactMatchComparator {
    fn matches(&self, rule_value: &Method, req_value: &Method) -> bool {
        rule_value == req_value
    }

    fn name(&self) -> &str {
        "equals"
    }
}

// ************************************************************************************************
// CaseInsensitiveComparator
// ************************************************************************************************
pub(crate) struct CaseInsensitiveComparator;

impl ValueComparator<String> for CaseInsensitiveComparator {
    fn matches(&self, rule_value: &String, req_value: &String) -> bool {
        rule_value.eq_ignore_ascii_case(req_value)
    }

    fn name(&self) -> &str {
        "equals (case-insensitive)"
    }
}
