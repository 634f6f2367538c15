use pkg_constants::controller::BINDING_NAME_SEPARATOR;

/// Name of the binding that grants `role_name` to `subject_name`.
///
/// The same name is used cluster-wide and in every namespace, and it is the
/// only thing checked when deciding whether a binding already exists.
pub fn binding_name(role_name: &str, subject_name: &str) -> String {
    format!("{}{}{}", role_name, BINDING_NAME_SEPARATOR, subject_name)
}
