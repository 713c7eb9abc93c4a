mod tests_read;
