mod tests_heads;
